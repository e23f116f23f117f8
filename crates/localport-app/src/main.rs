//! localportd - the localport daemon.
//!
//! Wires the discovery pipeline, the stores, the CA, and the two listeners
//! together, then runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use localport_core::naming::{NameGenerator, RuleEngine};
use localport_core::notify::{NotifyConfig, NotifyManager};
use localport_core::SystemScanner;
use localport_proxy::{server, AppState, DaemonOptions, DiscoveryLoop};
use localport_storage::{paths, BlacklistStore, ServiceStore};
use localport_tls::{CertAuthority, DomainPolicy, LeafIssuer};

/// Warn (and notify) when the intermediate CA is this close to expiry.
const INTERMEDIATE_EXPIRY_WARNING: time::Duration = time::Duration::days(30);

#[derive(Debug, Parser)]
#[command(
    name = "localportd",
    version,
    about = "Daemon giving every local HTTP service a *.localhost URL"
)]
struct Args {
    /// Listen on 8080/8443 instead of 80/443 (no root required).
    #[arg(long, visible_alias = "dev")]
    high_port: bool,

    /// Plaintext listen port.
    #[arg(long, default_value_t = 80)]
    http_port: u16,

    /// TLS listen port.
    #[arg(long, default_value_t = 443)]
    https_port: u16,

    /// Service store path (default: the per-user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// CA store directory (default: ~/.localtls).
    #[arg(long)]
    ca_store: Option<PathBuf>,

    /// Discovery interval in seconds.
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let args = Args::parse();
    let (http_port, https_port) = if args.high_port {
        (8080, 8443)
    } else {
        (args.http_port, args.https_port)
    };

    let store_path = args.config.unwrap_or_else(paths::services_path);
    let store = Arc::new(
        ServiceStore::open(&store_path)
            .with_context(|| format!("failed to open service store at {}", store_path.display()))?,
    );
    let blacklist = Arc::new(
        BlacklistStore::open(paths::blacklist_path()).context("failed to open blacklist store")?,
    );

    let notify_config = match NotifyConfig::load(&paths::notify_config_path()) {
        Ok(config) => config,
        Err(e) => {
            warn!("failed to load notification config: {e} (using defaults)");
            NotifyConfig::default()
        }
    };
    let notify = Arc::new(NotifyManager::desktop(notify_config));

    let rules = match RuleEngine::load(&paths::naming_rules_path()) {
        Ok(engine) => engine,
        Err(e) => {
            warn!("failed to load user naming rules: {e} (using built-in rules)");
            RuleEngine::builtin()
        }
    };
    let names = NameGenerator::new(rules);

    // The TLS listener only runs with a working CA; a failed bootstrap
    // degrades to HTTP-only instead of aborting the daemon.
    let ca_store = args.ca_store.unwrap_or_else(paths::ca_store_path);
    let issuer = match CertAuthority::load(&ca_store) {
        Ok(mut ca) => {
            if !ca.is_initialized() {
                info!("TLS CA not initialized, bootstrapping a new CA");
                if let Err(e) = ca.init() {
                    warn!("TLS CA bootstrap failed: {e} (HTTPS disabled)");
                }
            }
            if ca.is_initialized() {
                if let Ok((_, not_after)) = ca.tier_summary(true) {
                    let remaining = not_after - time::OffsetDateTime::now_utc();
                    if remaining < INTERMEDIATE_EXPIRY_WARNING {
                        warn!(
                            "intermediate CA expires in {} days; run `localport tls rotate`",
                            remaining.whole_days()
                        );
                        notify.cert_expiring(remaining.whole_days());
                    }
                }
                Some(Arc::new(LeafIssuer::new(Arc::new(ca), DomainPolicy::new())))
            } else {
                None
            }
        }
        Err(e) => {
            warn!("TLS CA unavailable: {e} (HTTPS disabled)");
            None
        }
    };

    let options = DaemonOptions {
        http_port,
        https_port,
        tls_enabled: issuer.is_some(),
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
    };

    info!("localportd starting");
    info!("storage: {}", store_path.display());
    if args.high_port {
        info!("running in high-port mode (no root required)");
    }

    let state = AppState::new(store, blacklist, names, notify, options);
    state.preload();

    let discovery = DiscoveryLoop::new(Arc::clone(&state), Arc::new(SystemScanner));
    tokio::spawn(discovery.run());

    if http_port == 80 {
        info!("dashboard: http://localhost/");
    } else {
        info!("dashboard: http://localhost:{http_port}/");
    }

    server::run(state, issuer).await?;
    Ok(())
}
