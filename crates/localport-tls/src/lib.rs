//! localport TLS - on-machine certificate authority.
//!
//! A two-tier CA (long-lived root signing a one-year intermediate) issues
//! short-lived leaf certificates for local development names, on demand,
//! keyed by SNI. A domain policy guarantees the CA can never sign a name
//! under a public TLD.
//!
//! Layout mirrors the pipeline: [`policy`] validates, [`ca`] signs,
//! [`issuer`] caches, and [`resolver`] plugs the issuer into a rustls
//! listener as its dynamic certificate callback.

pub mod ca;
pub mod error;
pub mod issuer;
pub mod policy;
pub mod resolver;

pub use ca::CertAuthority;
pub use error::{PolicyError, Result, TlsError};
pub use issuer::{CachedCert, IssueRequest, LeafIssuer, DEFAULT_VALID_FOR};
pub use policy::DomainPolicy;
pub use resolver::CertResolver;
