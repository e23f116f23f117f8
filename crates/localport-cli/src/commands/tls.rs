//! Certificate authority management.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use localport_storage::atomic::write_atomic;
use localport_storage::paths;
use localport_tls::{CertAuthority, DomainPolicy, IssueRequest, LeafIssuer};

/// Rotation is suggested when the intermediate is this close to expiry.
const ROTATE_WARNING: time::Duration = time::Duration::days(30);

#[derive(Debug, Subcommand)]
pub enum TlsCommand {
    /// Bootstrap the certificate authority
    Init,
    /// Show CA material and expiry status
    Status,
    /// Issue (or reissue) a certificate for a domain and save it
    Ensure { domain: String },
    /// List issued certificates
    List,
    /// Rotate the intermediate CA
    Rotate,
    /// Print server configuration for a domain: nginx, caddy, or traefik
    Export { format: String, domain: String },
    /// Explain how to remove the root CA from the OS trust store
    Untrust,
}

pub fn run(command: TlsCommand) -> Result<()> {
    match command {
        TlsCommand::Init => init(),
        TlsCommand::Status => status(),
        TlsCommand::Ensure { domain } => {
            ensure(&domain)?;
            Ok(())
        }
        TlsCommand::List => list(),
        TlsCommand::Rotate => rotate(),
        TlsCommand::Export { format, domain } => export(&format, &domain),
        TlsCommand::Untrust => untrust(),
    }
}

fn open_ca() -> Result<CertAuthority> {
    let store = paths::ca_store_path();
    CertAuthority::load(&store)
        .with_context(|| format!("failed to access CA store at {}", store.display()))
}

/// Bare names get `.localhost`; names with a dot are taken as-is.
fn qualify(domain: &str) -> String {
    if domain.contains('.') {
        domain.to_string()
    } else {
        format!("{domain}.localhost")
    }
}

/// Certificate file name for a domain: `*` and `/` are not filesystem-safe.
fn safe_file_name(domain: &str) -> String {
    domain.replace('*', "_wildcard").replace('/', "_")
}

fn init() -> Result<()> {
    let mut ca = open_ca()?;
    if ca.is_initialized() {
        println!("CA already initialized.");
    } else {
        println!("Bootstrapping new certificate authority...");
        ca.init()?;
        println!("CA created at {}", ca.store_path().display());
    }

    println!(
        "Root certificate: {}",
        ca.store_path().join("root_ca.pem").display()
    );
    println!("Install it into your OS or browser trust store to avoid certificate warnings.");
    Ok(())
}

fn status() -> Result<()> {
    let ca = open_ca()?;
    println!("CA Store: {}", ca.store_path().display());

    if !ca.is_initialized() {
        println!("Status: NOT INITIALIZED");
        println!("  Run 'localport tls init' to bootstrap the CA.");
        return Ok(());
    }

    let (root_subject, root_expiry) = ca.tier_summary(false)?;
    let (inter_subject, inter_expiry) = ca.tier_summary(true)?;

    println!("Status: INITIALIZED");
    println!("  Root CA:         {root_subject}");
    println!("  Root expires:    {}", root_expiry.date());
    println!("  Intermediate:    {inter_subject}");
    println!("  Inter expires:   {}", inter_expiry.date());

    if inter_expiry - time::OffsetDateTime::now_utc() < ROTATE_WARNING {
        println!("  WARNING: intermediate CA expires within 30 days. Run 'localport tls rotate'.");
    }

    let issued = std::fs::read_dir(ca.certs_dir())
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_name().to_string_lossy().ends_with(".pem"))
                .count()
        })
        .unwrap_or(0);
    println!("  Issued certs:    {issued}");
    Ok(())
}

fn ensure(domain: &str) -> Result<(PathBuf, PathBuf)> {
    let domain = qualify(domain);

    let ca = open_ca()?;
    if !ca.is_initialized() {
        bail!("CA not initialized. Run 'localport tls init' first.");
    }

    // Wildcard certificates also cover their base domain.
    let mut dns_names = vec![domain.clone()];
    if let Some(base) = domain.strip_prefix("*.") {
        dns_names.push(base.to_string());
    }

    let issuer = LeafIssuer::new(std::sync::Arc::new(ca), DomainPolicy::new());
    let cached = issuer.issue(IssueRequest {
        dns_names: dns_names.clone(),
        ..Default::default()
    })?;

    let certs_dir = issuer_certs_dir()?;
    let safe = safe_file_name(&domain);
    let cert_path = certs_dir.join(format!("{safe}.pem"));
    let key_path = certs_dir.join(format!("{safe}.key"));

    write_atomic(&cert_path, cached.cert_pem.as_bytes(), 0o644)?;
    write_atomic(&key_path, cached.key_pem.as_bytes(), 0o600)?;

    println!("Certificate issued for: {}", dns_names.join(", "));
    println!("  Cert: {}", cert_path.display());
    println!("  Key:  {}", key_path.display());
    println!("  Expires: {}", cached.expiry.date());
    Ok((cert_path, key_path))
}

fn issuer_certs_dir() -> Result<PathBuf> {
    let dir = paths::ca_store_path().join("certs");
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}

fn list() -> Result<()> {
    let certs_dir = paths::ca_store_path().join("certs");
    let entries = match std::fs::read_dir(&certs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No certificates issued yet.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_suffix(".pem")
                .map(str::to_string)
        })
        .collect();
    names.sort();

    if names.is_empty() {
        println!("No certificates issued yet.");
        return Ok(());
    }

    println!("{:<40} {}", "DOMAIN", "CERT FILE");
    println!("{}", "-".repeat(70));
    for name in names {
        let domain = name.replace("_wildcard", "*");
        println!(
            "{:<40} {}",
            domain,
            certs_dir.join(format!("{name}.pem")).display()
        );
    }
    Ok(())
}

fn rotate() -> Result<()> {
    let mut ca = open_ca()?;
    if !ca.is_initialized() {
        bail!("CA not initialized. Run 'localport tls init' first.");
    }

    println!("Rotating intermediate CA...");
    ca.rotate_intermediate()?;

    let (_, expiry) = ca.tier_summary(true)?;
    println!("Intermediate CA rotated successfully.");
    println!("  New expiry: {}", expiry.date());
    println!("Existing leaf certificates remain valid until they expire.");
    Ok(())
}

fn export(format: &str, domain: &str) -> Result<()> {
    let domain = qualify(domain);
    let certs_dir = paths::ca_store_path().join("certs");
    let safe = safe_file_name(&domain);
    let cert_path = certs_dir.join(format!("{safe}.pem"));
    let key_path = certs_dir.join(format!("{safe}.key"));

    if !cert_path.exists() {
        println!("No certificate found for {domain}. Issuing one...");
        ensure(&domain)?;
    }

    match format.to_ascii_lowercase().as_str() {
        "nginx" => {
            println!("# nginx SSL configuration for {domain}");
            println!("server {{");
            println!("    listen 443 ssl;");
            println!("    server_name {domain};");
            println!();
            println!("    ssl_certificate     {};", cert_path.display());
            println!("    ssl_certificate_key {};", key_path.display());
            println!("    ssl_protocols       TLSv1.2 TLSv1.3;");
            println!("}}");
        }
        "caddy" => {
            println!("# Caddy configuration for {domain}");
            println!("{domain} {{");
            println!("    tls {} {}", cert_path.display(), key_path.display());
            println!("    reverse_proxy localhost:PORT");
            println!("}}");
        }
        "traefik" => {
            println!("# Traefik dynamic configuration for {domain}");
            println!("tls:");
            println!("  certificates:");
            println!("    - certFile: {}", cert_path.display());
            println!("      keyFile: {}", key_path.display());
        }
        other => bail!("unknown export format: {other} (supported: nginx, caddy, traefik)"),
    }
    Ok(())
}

fn untrust() -> Result<()> {
    let ca = open_ca()?;
    if !ca.is_initialized() {
        println!("CA not initialized. Nothing to untrust.");
        return Ok(());
    }

    let root = ca.store_path().join("root_ca.pem");
    println!("Remove the root CA from your OS trust store, then delete the material:");
    println!("  Root certificate: {}", root.display());
    println!("  macOS:  security delete-certificate -c \"localport Root CA\"");
    println!("  Linux:  remove the certificate from /usr/local/share/ca-certificates and run update-ca-certificates");
    println!("Run 'localport cleanup' afterwards to delete the CA store.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_are_qualified() {
        assert_eq!(qualify("myapp"), "myapp.localhost");
        assert_eq!(qualify("myapp.localhost"), "myapp.localhost");
        assert_eq!(qualify("*.myapp.localhost"), "*.myapp.localhost");
    }

    #[test]
    fn file_names_replace_unsafe_characters() {
        assert_eq!(safe_file_name("myapp.localhost"), "myapp.localhost");
        assert_eq!(safe_file_name("*.myapp.localhost"), "_wildcard.myapp.localhost");
    }
}
