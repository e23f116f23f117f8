//! Error types for the discovery pipeline.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Reading a kernel socket table failed; the whole scan is aborted.
    #[error("port scan failed: {0}")]
    Scan(String),

    /// Port scanning is not implemented for this platform.
    #[error("port scanning is not supported on this platform")]
    UnsupportedPlatform,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document (rules overlay, notify config) failed to parse.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// Notification delivery failed.
    #[error("notification error: {0}")]
    Notify(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
