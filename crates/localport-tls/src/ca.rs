//! Two-tier certificate authority.
//!
//! A self-signed P-256 root (~10 years) signs a P-256 intermediate (~1 year,
//! path length 0); leaves are signed by the intermediate so the root key is
//! only touched at init and rotation. All material persists under the CA
//! store directory with 0600 keys and 0644 certificates, written atomically.

use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, Issuer,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls_pki_types::CertificateDer;
use time::{Duration, OffsetDateTime};

use localport_storage::atomic::write_atomic;

use crate::error::{Result, TlsError};

/// Root certificate lifetime.
const ROOT_VALIDITY: Duration = Duration::days(10 * 365);
/// Intermediate certificate lifetime.
const INTERMEDIATE_VALIDITY: Duration = Duration::days(365);

const ROOT_CERT_FILE: &str = "root_ca.pem";
const ROOT_KEY_FILE: &str = "root_ca.key";
const INTERMEDIATE_CERT_FILE: &str = "intermediate.pem";
const INTERMEDIATE_KEY_FILE: &str = "intermediate.key";

/// One tier of the hierarchy, ready to sign.
struct Tier {
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    issuer: Issuer<'static, KeyPair>,
}

struct CaMaterial {
    root: Tier,
    intermediate: Tier,
}

/// The certificate authority, possibly uninitialized.
pub struct CertAuthority {
    store_path: PathBuf,
    material: Option<CaMaterial>,
}

impl CertAuthority {
    /// Opens the CA at `store_path`, loading material if all four files are
    /// present; otherwise the CA is returned uninitialized.
    pub fn load(store_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        fs::create_dir_all(&store_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&store_path, fs::Permissions::from_mode(0o700))?;
        }

        let paths = [
            store_path.join(ROOT_CERT_FILE),
            store_path.join(ROOT_KEY_FILE),
            store_path.join(INTERMEDIATE_CERT_FILE),
            store_path.join(INTERMEDIATE_KEY_FILE),
        ];
        if paths.iter().any(|p| !p.exists()) {
            return Ok(Self {
                store_path,
                material: None,
            });
        }

        let root = load_tier(&paths[0], &paths[1])?;
        let intermediate = load_tier(&paths[2], &paths[3])?;

        Ok(Self {
            store_path,
            material: Some(CaMaterial { root, intermediate }),
        })
    }

    /// True when both tiers are loaded.
    pub fn is_initialized(&self) -> bool {
        self.material.is_some()
    }

    /// Generates and persists both tiers.
    ///
    /// Refuses when the CA already has material.
    pub fn init(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Err(TlsError::AlreadyInitialized);
        }

        let now = OffsetDateTime::now_utc();

        let root_key = KeyPair::generate()?;
        let mut root_params = ca_params("localport Root CA", now, ROOT_VALIDITY);
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root_cert = root_params.self_signed(&root_key)?;
        let root_key_pem = root_key.serialize_pem();
        let root = Tier {
            cert_pem: root_cert.pem(),
            cert_der: root_cert.der().clone(),
            issuer: Issuer::new(root_params, root_key),
        };

        let (intermediate, inter_key_pem) = new_intermediate(&root.issuer, now)?;

        self.persist_tier(&root.cert_pem, &root_key_pem, ROOT_CERT_FILE, ROOT_KEY_FILE)?;
        self.persist_tier(
            &intermediate.cert_pem,
            &inter_key_pem,
            INTERMEDIATE_CERT_FILE,
            INTERMEDIATE_KEY_FILE,
        )?;

        self.material = Some(CaMaterial { root, intermediate });
        Ok(())
    }

    /// Regenerates and re-signs the intermediate; the root is untouched.
    pub fn rotate_intermediate(&mut self) -> Result<()> {
        let material = self.material.as_mut().ok_or(TlsError::NotInitialized)?;

        let now = OffsetDateTime::now_utc();
        let (intermediate, key_pem) = new_intermediate(&material.root.issuer, now)?;

        let cert_path = self.store_path.join(INTERMEDIATE_CERT_FILE);
        let key_path = self.store_path.join(INTERMEDIATE_KEY_FILE);
        write_atomic(&cert_path, intermediate.cert_pem.as_bytes(), 0o644)?;
        write_atomic(&key_path, key_pem.as_bytes(), 0o600)?;

        material.intermediate = intermediate;
        Ok(())
    }

    /// Signs `params` with the intermediate, generating a random serial when
    /// the template has none, and returns the leaf certificate.
    pub fn sign(&self, mut params: CertificateParams, public_key: &KeyPair) -> Result<Certificate> {
        let material = self.material.as_ref().ok_or(TlsError::NotInitialized)?;

        if params.serial_number.is_none() {
            params.serial_number = Some(random_serial());
        }
        Ok(params.signed_by(public_key, &material.intermediate.issuer)?)
    }

    /// PEM of the root certificate.
    pub fn root_cert_pem(&self) -> Option<&str> {
        self.material.as_ref().map(|m| m.root.cert_pem.as_str())
    }

    /// PEM of the intermediate certificate.
    pub fn intermediate_cert_pem(&self) -> Option<&str> {
        self.material
            .as_ref()
            .map(|m| m.intermediate.cert_pem.as_str())
    }

    /// DER of the root certificate.
    pub fn root_der(&self) -> Option<&CertificateDer<'static>> {
        self.material.as_ref().map(|m| &m.root.cert_der)
    }

    /// DER of the intermediate certificate.
    pub fn intermediate_der(&self) -> Option<&CertificateDer<'static>> {
        self.material.as_ref().map(|m| &m.intermediate.cert_der)
    }

    /// Subject and expiry of a tier, read back from the certificate.
    pub fn tier_summary(&self, intermediate: bool) -> Result<(String, OffsetDateTime)> {
        let material = self.material.as_ref().ok_or(TlsError::NotInitialized)?;
        let der = if intermediate {
            &material.intermediate.cert_der
        } else {
            &material.root.cert_der
        };
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| TlsError::Parse(e.to_string()))?;
        Ok((
            cert.subject().to_string(),
            cert.validity().not_after.to_datetime(),
        ))
    }

    /// The CA store directory.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Directory for certificates issued via `tls ensure`.
    pub fn certs_dir(&self) -> PathBuf {
        self.store_path.join("certs")
    }

    fn persist_tier(
        &self,
        cert_pem: &str,
        key_pem: &str,
        cert_file: &str,
        key_file: &str,
    ) -> Result<()> {
        write_atomic(&self.store_path.join(cert_file), cert_pem.as_bytes(), 0o644)?;
        write_atomic(&self.store_path.join(key_file), key_pem.as_bytes(), 0o600)?;
        Ok(())
    }
}

/// Generates a fresh intermediate signed by `root`.
fn new_intermediate(
    root: &Issuer<'static, KeyPair>,
    now: OffsetDateTime,
) -> Result<(Tier, String)> {
    let key = KeyPair::generate()?;
    let mut params = ca_params("localport Intermediate CA", now, INTERMEDIATE_VALIDITY);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));

    let cert = params.signed_by(&key, root)?;
    let key_pem = key.serialize_pem();

    Ok((
        Tier {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            issuer: Issuer::new(params, key),
        },
        key_pem,
    ))
}

fn ca_params(common_name: &str, now: OffsetDateTime, validity: Duration) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = now;
    params.not_after = now + validity;
    params.serial_number = Some(random_serial());
    params
}

/// Cryptographically random 128-bit serial.
pub(crate) fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Clear the top bit so the DER integer stays positive without padding.
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}

fn load_tier(cert_path: &Path, key_path: &Path) -> Result<Tier> {
    let cert_pem = fs::read_to_string(cert_path)?;
    let key_pem = fs::read_to_string(key_path)?;

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .next()
        .ok_or_else(|| TlsError::Parse(format!("no certificate in {}", cert_path.display())))?
        .map_err(|e| TlsError::Parse(e.to_string()))?;

    let key = KeyPair::from_pem(&key_pem)?;
    let issuer = Issuer::from_ca_cert_der(&cert_der, key)
        .map_err(|e| TlsError::Parse(format!("{}: {e}", cert_path.display())))?;

    Ok(Tier {
        cert_pem,
        cert_der,
        issuer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_temp() -> (tempfile::TempDir, CertAuthority) {
        let dir = tempfile::tempdir().unwrap();
        let mut ca = CertAuthority::load(dir.path().join("ca")).unwrap();
        ca.init().unwrap();
        (dir, ca)
    }

    #[test]
    fn fresh_store_is_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertAuthority::load(dir.path().join("ca")).unwrap();
        assert!(!ca.is_initialized());
        assert!(ca.root_cert_pem().is_none());
    }

    #[test]
    fn init_writes_all_four_files() {
        let (_dir, ca) = init_temp();
        for file in [
            ROOT_CERT_FILE,
            ROOT_KEY_FILE,
            INTERMEDIATE_CERT_FILE,
            INTERMEDIATE_KEY_FILE,
        ] {
            assert!(ca.store_path().join(file).exists(), "{file} missing");
        }
    }

    #[cfg(unix)]
    #[test]
    fn keys_are_private_certs_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, ca) = init_temp();
        let mode = |f: &str| {
            fs::metadata(ca.store_path().join(f))
                .unwrap()
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode(ROOT_KEY_FILE), 0o600);
        assert_eq!(mode(INTERMEDIATE_KEY_FILE), 0o600);
        assert_eq!(mode(ROOT_CERT_FILE), 0o644);
        assert_eq!(mode(INTERMEDIATE_CERT_FILE), 0o644);
    }

    #[test]
    fn double_init_is_refused() {
        let (_dir, mut ca) = init_temp();
        assert!(matches!(ca.init(), Err(TlsError::AlreadyInitialized)));
    }

    #[test]
    fn reload_restores_material() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("ca");
        let root_pem = {
            let mut ca = CertAuthority::load(&store).unwrap();
            ca.init().unwrap();
            ca.root_cert_pem().unwrap().to_string()
        };

        let ca = CertAuthority::load(&store).unwrap();
        assert!(ca.is_initialized());
        assert_eq!(ca.root_cert_pem().unwrap(), root_pem);
    }

    #[test]
    fn rotate_replaces_only_the_intermediate() {
        let (_dir, mut ca) = init_temp();
        let root_before = ca.root_cert_pem().unwrap().to_string();
        let inter_before = ca.intermediate_cert_pem().unwrap().to_string();

        ca.rotate_intermediate().unwrap();

        assert_eq!(ca.root_cert_pem().unwrap(), root_before);
        assert_ne!(ca.intermediate_cert_pem().unwrap(), inter_before);

        // Persisted file matches the new in-memory material.
        let on_disk = fs::read_to_string(ca.store_path().join(INTERMEDIATE_CERT_FILE)).unwrap();
        assert_eq!(on_disk, ca.intermediate_cert_pem().unwrap());
    }

    #[test]
    fn rotate_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut ca = CertAuthority::load(dir.path().join("ca")).unwrap();
        assert!(matches!(
            ca.rotate_intermediate(),
            Err(TlsError::NotInitialized)
        ));
    }

    #[test]
    fn sign_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertAuthority::load(dir.path().join("ca")).unwrap();
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec!["x.localhost".to_string()]).unwrap();
        assert!(matches!(ca.sign(params, &key), Err(TlsError::NotInitialized)));
    }

    #[test]
    fn tier_summaries_read_back_subject_and_expiry() {
        let (_dir, ca) = init_temp();

        let (root_subject, root_expiry) = ca.tier_summary(false).unwrap();
        let (inter_subject, inter_expiry) = ca.tier_summary(true).unwrap();

        assert!(root_subject.contains("localport Root CA"));
        assert!(inter_subject.contains("localport Intermediate CA"));
        assert!(root_expiry > inter_expiry);

        let now = OffsetDateTime::now_utc();
        assert!(inter_expiry - now > Duration::days(360));
        assert!(root_expiry - now > Duration::days(3600));
    }

    #[test]
    fn intermediate_chains_to_root() {
        let (_dir, ca) = init_temp();

        let (_, root) =
            x509_parser::parse_x509_certificate(ca.root_der().unwrap().as_ref()).unwrap();
        let (_, inter) =
            x509_parser::parse_x509_certificate(ca.intermediate_der().unwrap().as_ref()).unwrap();

        assert_eq!(inter.issuer(), root.subject());
        assert!(inter.verify_signature(Some(root.public_key())).is_ok());
        // Self-signed root.
        assert!(root.verify_signature(None).is_ok());
    }

    #[test]
    fn serials_are_random_and_positive() {
        let a = random_serial();
        let b = random_serial();
        assert_ne!(a, b);
    }
}
