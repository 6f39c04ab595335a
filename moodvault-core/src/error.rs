/*!
Error types for the moodvault backup engine.
*/

use thiserror::Error;

/// Result type used throughout the moodvault core.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors that can occur while exporting, uploading, or restoring backups.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The backend needs an interactive account sign-in before it can be used
    #[error("Sign-in required: {0}")]
    AuthRequired(String),

    /// The platform or remote service is not reachable
    #[error("Backup service unavailable: {0}")]
    Availability(String),

    /// Snapshot bytes could not be parsed or carry an unknown schema version
    #[error("Invalid snapshot format: {0}")]
    Format(String),

    /// A chunked backup is missing at least one of its parts
    #[error("Incomplete backup manifest: chunk {missing} of {chunk_count} is missing")]
    IncompleteManifest { missing: usize, chunk_count: usize },

    /// Transport failure talking to a backend
    #[error("Network error: {0}")]
    Network(String),

    /// A backend call did not finish within the configured timeout
    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// A merge stopped partway through a category
    #[error("Import of {category} stopped early: {reason}")]
    PartialImport { category: String, reason: String },

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Local store or backend storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl VaultError {
    pub fn auth_required<S: Into<String>>(msg: S) -> Self {
        Self::AuthRequired(msg.into())
    }

    pub fn availability<S: Into<String>>(msg: S) -> Self {
        Self::Availability(msg.into())
    }

    /// Create a new invalid format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Self::Format(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    pub fn timeout<S: Into<String>>(operation: S, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    pub fn partial_import<C: Into<String>, R: Into<String>>(category: C, reason: R) -> Self {
        Self::PartialImport {
            category: category.into(),
            reason: reason.into(),
        }
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for failures that the next scheduler tick may not see again.
    ///
    /// Nothing retries on this basis; it only decides how loudly a failed
    /// automatic backup is logged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::Availability(_)
        )
    }
}
