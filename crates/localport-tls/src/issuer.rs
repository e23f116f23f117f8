//! On-demand leaf issuance.
//!
//! Issues short-lived P-256 leaf certificates signed by the intermediate,
//! after every requested name has passed the domain policy. Results are
//! cached by their primary DNS name; a cached certificate within one hour of
//! expiry is reissued on next use.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::crypto::aws_lc_rs::sign::any_ecdsa_type;
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};

use crate::ca::CertAuthority;
use crate::error::{Result, TlsError};
use crate::policy::DomainPolicy;

/// Default leaf lifetime.
pub const DEFAULT_VALID_FOR: Duration = Duration::hours(24);

/// A cached certificate this close to expiry is reissued instead of served.
const RENEW_BEFORE: Duration = Duration::hours(1);

/// A leaf certificate to create.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub dns_names: Vec<String>,
    pub ips: Vec<IpAddr>,
    /// Defaults to [`DEFAULT_VALID_FOR`].
    pub valid_for: Option<Duration>,
}

impl IssueRequest {
    /// Request for a single DNS name.
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            dns_names: vec![name.into()],
            ..Default::default()
        }
    }
}

/// An issued leaf, ready both for serving and for export.
#[derive(Debug)]
pub struct CachedCert {
    pub cert_pem: String,
    pub key_pem: String,
    /// Presentation chain `[leaf, intermediate]` with the signing key.
    pub certified: Arc<CertifiedKey>,
    pub expiry: OffsetDateTime,
}

/// Issues and caches leaf certificates signed by the local CA.
pub struct LeafIssuer {
    ca: Arc<CertAuthority>,
    policy: DomainPolicy,
    cache: RwLock<HashMap<String, Arc<CachedCert>>>,
}

impl LeafIssuer {
    pub fn new(ca: Arc<CertAuthority>, policy: DomainPolicy) -> Self {
        Self {
            ca,
            policy,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The domain policy in force.
    pub fn policy(&self) -> &DomainPolicy {
        &self.policy
    }

    /// Issues a leaf certificate, caching it under its primary DNS name.
    ///
    /// Policy runs over every requested name before any key is generated.
    pub fn issue(&self, request: IssueRequest) -> Result<Arc<CachedCert>> {
        if request.dns_names.is_empty() && request.ips.is_empty() {
            return Err(TlsError::EmptyRequest);
        }

        for name in &request.dns_names {
            if name.starts_with("*.") {
                self.policy.validate_wildcard(name)?;
            } else {
                self.policy.validate_domain(name)?;
            }
        }

        let key = KeyPair::generate()?;

        let now = OffsetDateTime::now_utc();
        let valid_for = request.valid_for.unwrap_or(DEFAULT_VALID_FOR);

        let mut params = CertificateParams::default();
        for name in &request.dns_names {
            params
                .subject_alt_names
                .push(SanType::DnsName(name.as_str().try_into().map_err(
                    |e: rcgen::Error| TlsError::Certificate(e),
                )?));
        }
        for ip in &request.ips {
            params.subject_alt_names.push(SanType::IpAddress(*ip));
        }
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = now;
        params.not_after = now + valid_for;

        // CN is display only; verification is SAN-based.
        if let Some(primary) = request.dns_names.first() {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, primary.as_str());
            params.distinguished_name = dn;
        }

        let cert = self.ca.sign(params, &key)?;

        let intermediate = self
            .ca
            .intermediate_der()
            .ok_or(TlsError::NotInitialized)?
            .clone();
        let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone(), intermediate];

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        let signing_key =
            any_ecdsa_type(&key_der).map_err(|e| TlsError::InvalidKey(e.to_string()))?;

        let cached = Arc::new(CachedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            certified: Arc::new(CertifiedKey::new(chain, signing_key)),
            expiry: now + valid_for,
        });

        if let Some(primary) = request.dns_names.first() {
            // Concurrent handshakes for the same name race here; last writer
            // wins and both certificates are valid.
            self.cache
                .write()
                .insert(primary.clone(), Arc::clone(&cached));
        }
        Ok(cached)
    }

    /// Certificate for an SNI: cached when fresh, reissued when missing or
    /// within the renewal window.
    pub fn certificate_for(&self, server_name: &str) -> Result<Arc<CachedCert>> {
        self.policy.validate_domain(server_name)?;

        if let Some(cached) = self.cache.read().get(server_name) {
            if OffsetDateTime::now_utc() < cached.expiry - RENEW_BEFORE {
                return Ok(Arc::clone(cached));
            }
        }
        self.issue(IssueRequest::for_name(server_name))
    }

    /// Number of cached leaves.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::PolicyError;

    fn issuer() -> (tempfile::TempDir, LeafIssuer) {
        let dir = tempfile::tempdir().unwrap();
        let mut ca = CertAuthority::load(dir.path().join("ca")).unwrap();
        ca.init().unwrap();
        (dir, LeafIssuer::new(Arc::new(ca), DomainPolicy::new()))
    }

    fn parse_leaf(pem: &str) -> (Vec<u8>, Vec<String>, OffsetDateTime) {
        let der = rustls_pemfile::certs(&mut pem.as_bytes())
            .next()
            .unwrap()
            .unwrap();
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref()).unwrap();

        let sans = cert
            .subject_alternative_name()
            .unwrap()
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|n| match n {
                        x509_parser::extensions::GeneralName::DNSName(d) => Some(d.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        (
            cert.raw_serial().to_vec(),
            sans,
            cert.validity().not_after.to_datetime(),
        )
    }

    #[test]
    fn issues_a_leaf_with_san_and_default_validity() {
        let (_dir, issuer) = issuer();
        let cached = issuer.issue(IssueRequest::for_name("foo.localhost")).unwrap();

        let (_, sans, not_after) = parse_leaf(&cached.cert_pem);
        assert!(sans.contains(&"foo.localhost".to_string()));

        let delta = not_after - OffsetDateTime::now_utc();
        assert!(delta > Duration::hours(23) && delta <= Duration::hours(24));
        assert_eq!(cached.certified.cert.len(), 2);
    }

    #[test]
    fn rejects_public_domains_before_generating_anything() {
        let (_dir, issuer) = issuer();

        let err = issuer
            .issue(IssueRequest::for_name("example.com"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Policy(PolicyError::PublicTld(_))));
        assert_eq!(issuer.cached_len(), 0);
    }

    #[test]
    fn rejects_empty_requests() {
        let (_dir, issuer) = issuer();
        assert!(matches!(
            issuer.issue(IssueRequest::default()),
            Err(TlsError::EmptyRequest)
        ));
    }

    #[test]
    fn one_bad_name_aborts_a_batch() {
        let (_dir, issuer) = issuer();
        let request = IssueRequest {
            dns_names: vec!["good.localhost".to_string(), "bad.com".to_string()],
            ..Default::default()
        };
        assert!(issuer.issue(request).is_err());
        assert_eq!(issuer.cached_len(), 0);
    }

    #[test]
    fn cache_returns_the_same_certificate_while_fresh() {
        let (_dir, issuer) = issuer();

        let first = issuer.certificate_for("foo.localhost").unwrap();
        let second = issuer.certificate_for("foo.localhost").unwrap();

        let (serial_a, _, _) = parse_leaf(&first.cert_pem);
        let (serial_b, _, _) = parse_leaf(&second.cert_pem);
        assert_eq!(serial_a, serial_b);
        assert_eq!(issuer.cached_len(), 1);
    }

    #[test]
    fn near_expiry_certificates_are_reissued() {
        let (_dir, issuer) = issuer();

        // 30 minutes of validity is inside the one-hour renewal window.
        let short = issuer
            .issue(IssueRequest {
                dns_names: vec!["foo.localhost".to_string()],
                valid_for: Some(Duration::minutes(30)),
                ..Default::default()
            })
            .unwrap();

        let renewed = issuer.certificate_for("foo.localhost").unwrap();
        let (serial_a, _, _) = parse_leaf(&short.cert_pem);
        let (serial_b, _, _) = parse_leaf(&renewed.cert_pem);
        assert_ne!(serial_a, serial_b);
    }

    #[test]
    fn wildcards_validate_as_wildcards() {
        let (_dir, issuer) = issuer();

        assert!(issuer
            .issue(IssueRequest::for_name("*.myapp.localhost"))
            .is_ok());
        assert!(matches!(
            issuer.issue(IssueRequest::for_name("*.localhost")),
            Err(TlsError::Policy(PolicyError::WildcardDepth(_)))
        ));
    }

    #[test]
    fn chain_verifies_leaf_to_intermediate_to_root() {
        let (_dir, issuer) = issuer();
        let cached = issuer.issue(IssueRequest::for_name("foo.localhost")).unwrap();

        let leaf_der = &cached.certified.cert[0];
        let inter_der = &cached.certified.cert[1];
        let (_, leaf) = x509_parser::parse_x509_certificate(leaf_der.as_ref()).unwrap();
        let (_, inter) = x509_parser::parse_x509_certificate(inter_der.as_ref()).unwrap();

        assert_eq!(leaf.issuer(), inter.subject());
        assert!(leaf.verify_signature(Some(inter.public_key())).is_ok());
        assert!(!leaf.is_ca());
    }

    #[test]
    fn sni_lookup_enforces_policy() {
        let (_dir, issuer) = issuer();
        assert!(matches!(
            issuer.certificate_for("evil.com"),
            Err(TlsError::Policy(PolicyError::PublicTld(_)))
        ));
    }
}
