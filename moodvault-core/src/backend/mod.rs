/*!
Backend adapters for remote backup storage.

This module defines the backend abstraction (port) and the concrete adapters.
Exactly one backend is selected at startup by platform detection and used for
every call afterwards:

- [`DriveBackend`]: account-linked drive storage, needs an interactive sign-in
- [`CloudBackend`]: platform container storage, gated by platform only
- [`MemoryBackend`]: in-process blobs for tests and dry runs
*/

pub mod cloud;
pub mod drive;
pub mod memory;
pub(crate) mod naming;

use crate::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use cloud::CloudBackend;
pub use drive::DriveBackend;
pub use memory::MemoryBackend;

/// Backend-assigned identifier of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What `list` reports about one stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupBlobDescriptor {
    pub id: BlobId,
    /// Generated blob name, `<prefix>_<epochMillis>.<ext>`
    pub name: String,
    /// Best effort: backend metadata when trustworthy, else the name's epoch
    pub created_at: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Common contract of every remote backup store
#[async_trait]
pub trait BackupBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Largest blob this backend accepts, if it caps value size
    fn max_blob_size(&self) -> Option<usize> {
        None
    }

    async fn is_available(&self) -> bool;

    /// Store `bytes` under a name derived from `name_hint`
    async fn upload(&self, bytes: &[u8], name_hint: &str) -> Result<BlobId>;

    /// Every stored blob, newest first
    async fn list(&self) -> Result<Vec<BackupBlobDescriptor>>;

    async fn download(&self, id: &BlobId) -> Result<Vec<u8>>;

    /// Delete a blob; `false` when there was nothing to delete
    async fn delete(&self, id: &BlobId) -> Result<bool>;
}

/// Sort descriptors newest first.
///
/// Backend timestamps win when present. Otherwise the epoch embedded in the
/// generated blob name is used and copied into `created_at`. Only backends'
/// `list` implementations call this.
pub(crate) fn order_newest_first(descriptors: &mut [BackupBlobDescriptor]) {
    for descriptor in descriptors.iter_mut() {
        if descriptor.created_at.is_none() {
            descriptor.created_at = naming::embedded_timestamp(&descriptor.name);
        }
    }
    descriptors.sort_by(|a, b| {
        Reverse((a.created_at, &a.name)).cmp(&Reverse((b.created_at, &b.name)))
    });
}

/// Bound a backend call by `limit`
pub(crate) async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(VaultError::timeout(operation, limit.as_secs())),
    }
}
