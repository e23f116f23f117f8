//! Error types for the certificate authority.

use thiserror::Error;

/// Domain policy violations.
///
/// These surface synchronously to whoever asked for a certificate; the
/// daemon never logs them as its own errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// Empty (or whitespace-only) domain.
    #[error("empty domain")]
    EmptyDomain,

    /// The domain ends with a public TLD from the IANA snapshot.
    #[error("domain {0:?} ends with a public TLD; the local CA must not issue certificates for real domains")]
    PublicTld(String),

    /// The domain does not end with an allowed local TLD.
    #[error("domain {0:?} does not end with an allowed TLD (.localhost, .test, .localdev, .internal, .home.arpa)")]
    NotAllowed(String),

    /// The wildcard is not of the form `*.<domain>`.
    #[error("wildcard {0:?}: the wildcard must be the left-most label (e.g. *.myapp.localhost)")]
    WildcardFormat(String),

    /// The wildcard base sits directly on the TLD.
    #[error("wildcard {0:?}: at least one label is required before the TLD (e.g. *.myapp.localhost)")]
    WildcardDepth(String),
}

/// TLS subsystem error type.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The CA has no material yet; run init first.
    #[error("CA is not initialized")]
    NotInitialized,

    /// Init was called on a CA that already has material.
    #[error("CA is already initialized")]
    AlreadyInitialized,

    /// A requested name failed policy validation.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// An issue request named no DNS names and no IPs.
    #[error("at least one DNS name or IP address is required")]
    EmptyRequest,

    /// Certificate generation or signing failed.
    #[error("certificate error: {0}")]
    Certificate(#[from] rcgen::Error),

    /// Persisted material failed to parse.
    #[error("failed to parse CA material: {0}")]
    Parse(String),

    /// A private key was rejected by the TLS stack.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// IO error on the CA store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for TLS operations.
pub type Result<T> = std::result::Result<T, TlsError>;
