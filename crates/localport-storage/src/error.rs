//! Error types for the storage layer.

use thiserror::Error;

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error while reading or writing a store file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A store file exists but does not parse as the expected document.
    #[error("malformed store file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization error while persisting.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record lookup by id failed.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// Record lookup by name failed.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// A name is already bound to a different record.
    #[error("name {0} is already in use")]
    NameInUse(String),

    /// Blacklist entry lookup failed.
    #[error("blacklist entry not found: {0}")]
    EntryNotFound(String),

    /// A blacklist entry failed validation.
    #[error("invalid blacklist entry: {0}")]
    InvalidEntry(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
