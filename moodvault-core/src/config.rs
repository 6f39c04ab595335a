//! Configuration for backend selection and backup behaviour
//!
//! A [`VaultConfig`] is built once at startup, either from defaults or from a
//! JSON file, and decides which backend the engine talks to for the rest of
//! the process lifetime.

use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RETENTION_KEEP: usize = 5;
pub const DEFAULT_DEBOUNCE_SECS: u64 = 3;
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 20;
pub const MAX_NETWORK_TIMEOUT_SECS: u64 = 120;
/// One century of daily records
pub const MAX_HISTORY_WINDOW_DAYS: u32 = 36_500;
pub const DEFAULT_BLOB_PREFIX: &str = "moodvault_backup";
pub const DEFAULT_CLOUD_MAX_BLOB_BYTES: usize = 1024 * 1024;

/// Remote store variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Account-linked drive storage
    Drive,
    /// Platform container storage
    Cloud,
}

impl BackendKind {
    /// Backend for the platform this binary was built for
    pub fn detect() -> Self {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            BackendKind::Cloud
        } else {
            BackendKind::Drive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Drive => "drive",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drive" => Ok(BackendKind::Drive),
            "cloud" => Ok(BackendKind::Cloud),
            other => Err(VaultError::validation(format!("Unknown backend: {other}"))),
        }
    }
}

/// Drive backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// App-scoped folder holding the backups
    pub folder_name: String,
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_name: "MoodVault Backups".to_string(),
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
        }
    }
}

/// Platform container backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Mounted root of the platform container
    pub container_root: PathBuf,
    /// Where staging files are written during transfers
    pub staging_dir: PathBuf,
    /// Largest blob the container accepts; bigger payloads are chunked
    pub max_blob_bytes: usize,
    pub platform_enabled: bool,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            container_root: PathBuf::from("moodvault-container"),
            staging_dir: std::env::temp_dir().join("moodvault-staging"),
            max_blob_bytes: DEFAULT_CLOUD_MAX_BLOB_BYTES,
            platform_enabled: cfg!(any(target_os = "macos", target_os = "ios")),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// `None` selects by platform
    pub backend: Option<BackendKind>,
    /// Logical backups kept after each successful backup
    pub retention_keep: usize,
    /// Quiet period coalescing bursts of edits into one backup attempt
    pub debounce_secs: u64,
    pub network_timeout_secs: u64,
    pub history_window_days: u32,
    pub compress_backups: bool,
    pub blob_prefix: String,
    pub drive: DriveConfig,
    pub cloud: CloudConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend: None,
            retention_keep: DEFAULT_RETENTION_KEEP,
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            history_window_days: crate::snapshot::DEFAULT_HISTORY_WINDOW_DAYS,
            compress_backups: true,
            blob_prefix: DEFAULT_BLOB_PREFIX.to_string(),
            drive: DriveConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Read a JSON configuration file; absent fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::validation(format!(
                "Failed to read config {}: {e}",
                path.display()
            ))
        })?;
        let config: VaultConfig = serde_json::from_str(&raw).map_err(|e| {
            VaultError::validation(format!("Invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Backend in effect after platform detection
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.unwrap_or_else(BackendKind::detect)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_keep == 0 {
            return Err(VaultError::validation(
                "retention_keep must keep at least one backup",
            ));
        }
        if !(1..=MAX_NETWORK_TIMEOUT_SECS).contains(&self.network_timeout_secs) {
            return Err(VaultError::validation(format!(
                "network_timeout_secs must be between 1 and {MAX_NETWORK_TIMEOUT_SECS}, got {}",
                self.network_timeout_secs
            )));
        }
        if !(1..=MAX_HISTORY_WINDOW_DAYS).contains(&self.history_window_days) {
            return Err(VaultError::validation(format!(
                "history_window_days must be between 1 and {MAX_HISTORY_WINDOW_DAYS}, got {}",
                self.history_window_days
            )));
        }
        if self.blob_prefix.is_empty()
            || self.blob_prefix.contains(['.', '/', '\\'])
        {
            return Err(VaultError::validation(format!(
                "blob_prefix {:?} must be non-empty and free of dots and separators",
                self.blob_prefix
            )));
        }
        if self.cloud.max_blob_bytes == 0 {
            return Err(VaultError::validation("cloud.max_blob_bytes must be positive"));
        }
        if self.backend_kind() == BackendKind::Drive && self.drive.folder_name.trim().is_empty() {
            return Err(VaultError::validation("drive.folder_name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention_keep, 5);
        assert_eq!(config.blob_prefix, "moodvault_backup");
        assert_eq!(config.network_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = VaultConfig {
            retention_keep: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VaultError::Validation(_))));

        config.retention_keep = 5;
        config.network_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.network_timeout_secs = 121;
        assert!(config.validate().is_err());

        config.network_timeout_secs = 30;
        config.blob_prefix = "bad.prefix".into();
        assert!(config.validate().is_err());

        config.blob_prefix = "ok".into();
        config.cloud.max_blob_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut config = VaultConfig {
            history_window_days: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VaultError::Validation(_))));

        config.history_window_days = MAX_HISTORY_WINDOW_DAYS;
        assert!(config.validate().is_ok());
        config.history_window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: VaultConfig =
            serde_json::from_str(r#"{"backend":"cloud","retention_keep":3}"#).unwrap();
        assert_eq!(config.backend_kind(), BackendKind::Cloud);
        assert_eq!(config.retention_keep, 3);
        assert_eq!(config.debounce_secs, DEFAULT_DEBOUNCE_SECS);
        assert_eq!(config.cloud.max_blob_bytes, DEFAULT_CLOUD_MAX_BLOB_BYTES);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("moodvault.json");
        std::fs::write(&path, r#"{"backend":"drive","debounce_secs":1}"#).unwrap();
        let config = VaultConfig::from_file(&path).unwrap();
        assert_eq!(config.debounce(), Duration::from_secs(1));

        std::fs::write(&path, r#"{"retention_keep":0}"#).unwrap();
        assert!(VaultConfig::from_file(&path).is_err());
        assert!(VaultConfig::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("Drive".parse::<BackendKind>().unwrap(), BackendKind::Drive);
        assert_eq!("cloud".parse::<BackendKind>().unwrap(), BackendKind::Cloud);
        assert!("s3".parse::<BackendKind>().is_err());
        let detected = BackendKind::detect();
        assert!(matches!(detected, BackendKind::Drive | BackendKind::Cloud));
    }
}
