//! Hook into the platform's own coarse system backup.
//!
//! On the one platform that has it, the system backup runs alongside the
//! chunked mirror and never replaces it. It is opaque to the engine: requests
//! are fire-and-forget and only a status summary comes back.

use crate::Result;
use serde::Serialize;

/// Coarse state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeStatus {
    Unavailable,
    Idle,
    Pending,
    Failed,
}

#[cfg_attr(test, mockall::automock)]
pub trait PlatformBackupBridge: Send + Sync {
    fn is_available(&self) -> bool;

    /// Ask the platform to schedule its own backup soon
    fn request_backup(&self) -> Result<()>;

    fn status(&self) -> BridgeStatus;
}
