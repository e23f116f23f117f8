//! rustls integration.
//!
//! The TLS listener hands each ClientHello to this resolver, which asks the
//! issuer for a certificate matching the SNI. Handshakes without SNI, names
//! the policy rejects, and issuance failures all resolve to `None`, which
//! rustls turns into a handshake failure.

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::issuer::LeafIssuer;

/// Dynamic certificate callback backed by the leaf issuer.
pub struct CertResolver {
    issuer: Arc<LeafIssuer>,
}

impl CertResolver {
    pub fn new(issuer: Arc<LeafIssuer>) -> Self {
        Self { issuer }
    }
}

impl std::fmt::Debug for CertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            tracing::debug!("TLS handshake without SNI refused");
            return None;
        };

        match self.issuer.certificate_for(server_name) {
            Ok(cached) => Some(Arc::clone(&cached.certified)),
            Err(e) => {
                tracing::debug!(server_name, "no certificate for handshake: {e}");
                None
            }
        }
    }
}
