//! Domain policy.
//!
//! The CA only signs names under a small set of local-use TLDs and refuses
//! anything that ends with a TLD from the embedded IANA root-zone snapshot.
//! Every policy check runs before any key generation or signing.

use std::collections::HashSet;

use crate::error::PolicyError;

/// Embedded snapshot of the IANA root zone.
const TLD_SNAPSHOT: &str = include_str!("tlds.txt");

/// TLDs the CA is allowed to sign, with leading dot.
const ALLOWED_TLDS: &[&str] = &[".localhost", ".test", ".localdev", ".internal", ".home.arpa"];

/// Validates certificate names against the allow and block lists.
pub struct DomainPolicy {
    blocked: HashSet<String>,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainPolicy {
    /// Policy with the hardcoded allow list and the embedded IANA snapshot.
    pub fn new() -> Self {
        let blocked = TLD_SNAPSHOT
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| format!(".{}", line.to_ascii_lowercase()))
            .collect();
        Self { blocked }
    }

    /// The allowed local TLDs, with leading dot.
    pub fn allowed_tlds(&self) -> &'static [&'static str] {
        ALLOWED_TLDS
    }

    /// True when `tld` (with leading dot) is an allowed local TLD.
    pub fn is_allowed_tld(&self, tld: &str) -> bool {
        let tld = tld.to_ascii_lowercase();
        ALLOWED_TLDS.contains(&tld.as_str())
    }

    /// Checks that `domain` is safe for the local CA to sign.
    pub fn validate_domain(&self, domain: &str) -> Result<(), PolicyError> {
        let domain = normalize(domain);
        if domain.is_empty() {
            return Err(PolicyError::EmptyDomain);
        }

        if ends_with_any(&domain, ALLOWED_TLDS.iter().copied()) {
            return Ok(());
        }
        if ends_with_any(&domain, self.blocked.iter().map(String::as_str)) {
            return Err(PolicyError::PublicTld(domain));
        }
        Err(PolicyError::NotAllowed(domain))
    }

    /// Checks that a wildcard pattern is safe for the local CA.
    ///
    /// The `*` must be the left-most label and the base must sit at least one
    /// label below the TLD: `*.myapp.localhost` is fine, `*.localhost` is
    /// not. For the multi-label TLD `.home.arpa` the requirement shifts up
    /// one label accordingly.
    pub fn validate_wildcard(&self, pattern: &str) -> Result<(), PolicyError> {
        let pattern = normalize(pattern);
        if pattern.is_empty() {
            return Err(PolicyError::EmptyDomain);
        }

        let Some(base) = pattern.strip_prefix("*.") else {
            return Err(PolicyError::WildcardFormat(pattern));
        };
        if base.contains('*') {
            return Err(PolicyError::WildcardFormat(pattern));
        }

        self.validate_domain(base)?;

        let labels = base.split('.').count();
        let required = if base.ends_with(".home.arpa") || base == "home.arpa" {
            3
        } else {
            2
        };
        if labels < required {
            return Err(PolicyError::WildcardDepth(pattern));
        }
        Ok(())
    }
}

fn normalize(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// True when `domain` equals a TLD (minus its dot) or ends with it.
fn ends_with_any<'a>(domain: &str, tlds: impl Iterator<Item = &'a str>) -> bool {
    for tld in tlds {
        if domain == &tld[1..] || domain.ends_with(tld) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_tlds_validate() {
        let policy = DomainPolicy::new();
        for domain in [
            "myapp.localhost",
            "api.myapp.localhost",
            "thing.test",
            "x.localdev",
            "svc.internal",
            "printer.home.arpa",
            "MyApp.LOCALHOST",
            "trailing.localhost.",
            "  padded.test  ",
        ] {
            assert!(policy.validate_domain(domain).is_ok(), "{domain} should pass");
        }
    }

    #[test]
    fn public_tlds_fail_with_the_distinct_error() {
        let policy = DomainPolicy::new();
        for domain in ["example.com", "api.example.dev", "site.io", "x.app", "a.co.uk"] {
            assert!(
                matches!(policy.validate_domain(domain), Err(PolicyError::PublicTld(_))),
                "{domain} should be blocked as public"
            );
        }
    }

    #[test]
    fn every_snapshot_entry_is_blocked() {
        let policy = DomainPolicy::new();
        for line in TLD_SNAPSHOT.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let domain = format!("x.{}", line.to_ascii_lowercase());
            assert!(
                matches!(policy.validate_domain(&domain), Err(PolicyError::PublicTld(_))),
                "{domain} should be blocked"
            );
        }
    }

    #[test]
    fn unknown_suffixes_fail_with_the_generic_error() {
        let policy = DomainPolicy::new();
        assert!(matches!(
            policy.validate_domain("thing.notarealtld"),
            Err(PolicyError::NotAllowed(_))
        ));
        assert!(matches!(
            policy.validate_domain("bare-host"),
            Err(PolicyError::NotAllowed(_))
        ));
    }

    #[test]
    fn empty_domain_is_rejected() {
        let policy = DomainPolicy::new();
        assert_eq!(policy.validate_domain(""), Err(PolicyError::EmptyDomain));
        assert_eq!(policy.validate_domain("   "), Err(PolicyError::EmptyDomain));
        assert_eq!(policy.validate_domain("."), Err(PolicyError::EmptyDomain));
    }

    #[test]
    fn bare_allowed_tld_passes_domain_validation() {
        // "localhost" itself is a valid (if unusual) certificate subject.
        let policy = DomainPolicy::new();
        assert!(policy.validate_domain("localhost").is_ok());
    }

    #[test]
    fn wildcards_require_depth_below_the_tld() {
        let policy = DomainPolicy::new();

        assert!(policy.validate_wildcard("*.myapp.localhost").is_ok());
        assert!(policy.validate_wildcard("*.api.myapp.localhost").is_ok());
        assert!(matches!(
            policy.validate_wildcard("*.localhost"),
            Err(PolicyError::WildcardDepth(_))
        ));
    }

    #[test]
    fn multi_label_tld_raises_the_depth_requirement() {
        let policy = DomainPolicy::new();

        assert!(policy.validate_wildcard("*.printer.home.arpa").is_ok());
        assert!(matches!(
            policy.validate_wildcard("*.home.arpa"),
            Err(PolicyError::WildcardDepth(_))
        ));
    }

    #[test]
    fn wildcard_shape_is_enforced() {
        let policy = DomainPolicy::new();

        assert!(matches!(
            policy.validate_wildcard("myapp.localhost"),
            Err(PolicyError::WildcardFormat(_))
        ));
        assert!(matches!(
            policy.validate_wildcard("*.my*.localhost"),
            Err(PolicyError::WildcardFormat(_))
        ));
        assert!(matches!(
            policy.validate_wildcard("*.example.com"),
            Err(PolicyError::PublicTld(_))
        ));
    }

    #[test]
    fn is_allowed_tld_checks_the_allow_set() {
        let policy = DomainPolicy::new();
        assert!(policy.is_allowed_tld(".localhost"));
        assert!(policy.is_allowed_tld(".HOME.ARPA"));
        assert!(!policy.is_allowed_tld(".com"));
    }
}
