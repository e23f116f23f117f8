//! Shared daemon state.
//!
//! The service table is the single source the router reads on every request
//! and discovery writes on every pass. Entries are immutable snapshots
//! behind `Arc`; updates replace the whole entry, which is also how the
//! cached upstream handle gets invalidated when the target or scheme
//! changes. The reverse-proxy handle itself is lazy: nothing is built until
//! the first request for a service arrives.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use localport_core::naming::{extract_group_from_exe, NameGenerator};
use localport_core::notify::NotifyManager;
use localport_storage::{BlacklistStore, ServiceRecord, ServiceStore};

use crate::error::ProxyError;

/// Health probes give an upstream this long to answer.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Listener and loop configuration.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Plaintext listen port (default 80; 8080 in high-port mode).
    pub http_port: u16,
    /// TLS listen port (default 443; 8443 in high-port mode).
    pub https_port: u16,
    /// Whether the TLS listener will run (CA initialized).
    pub tls_enabled: bool,
    /// Discovery reconcile interval.
    pub poll_interval: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            http_port: 80,
            https_port: 443,
            tls_enabled: false,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Lazily constructed reverse-proxy handle for one service.
pub struct Upstream {
    pub client: reqwest::Client,
    /// `scheme://host:port`, no trailing slash.
    pub base: String,
}

/// Runtime view of one service, immutable once published.
pub struct ServiceEntry {
    pub id: String,
    pub name: String,
    pub port: u16,
    /// Always non-empty; derives from the record's effective target host.
    pub target_host: String,
    pub pid: u32,
    pub exe_path: String,
    pub cwd: String,
    pub args: Vec<String>,
    pub group: String,
    pub use_tls: bool,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    pub keep: bool,
    pub user_defined: bool,
    upstream: OnceLock<Arc<Upstream>>,
}

impl ServiceEntry {
    /// Entry for a stored record; the runtime cwd is not persisted.
    pub fn from_record(record: &ServiceRecord, cwd: &str) -> Self {
        let group = if record.group.is_empty() {
            extract_group_from_exe(&record.exe_path, &record.name)
        } else {
            record.group.clone()
        };
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            port: record.port,
            target_host: record.effective_target_host().to_string(),
            pid: record.pid,
            exe_path: record.exe_path.clone(),
            cwd: cwd.to_string(),
            args: record.args.clone(),
            group,
            use_tls: record.use_tls,
            is_active: record.is_active,
            last_seen: record.last_seen,
            keep: record.keep,
            user_defined: record.user_defined,
            upstream: OnceLock::new(),
        }
    }

    /// Fresh snapshot for an updated record, keeping the cached upstream
    /// unless the target or scheme changed.
    pub fn updated(&self, record: &ServiceRecord, cwd: &str) -> Self {
        let entry = Self::from_record(record, cwd);
        let invalidated = entry.use_tls != self.use_tls
            || entry.port != self.port
            || entry.target_host != self.target_host;
        if !invalidated {
            if let Some(upstream) = self.upstream.get() {
                let _ = entry.upstream.set(Arc::clone(upstream));
            }
        }
        entry
    }

    /// `scheme://host:port` for this service's upstream.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.target_host, self.port)
    }

    /// The reverse-proxy handle, built on first use.
    ///
    /// Construction can race on concurrent first requests; the first
    /// completed handle wins and losers are dropped. Retrying after a
    /// build failure is safe.
    pub fn upstream(&self) -> Result<Arc<Upstream>, ProxyError> {
        if let Some(upstream) = self.upstream.get() {
            return Ok(Arc::clone(upstream));
        }

        let mut builder = reqwest::Client::builder();
        if self.use_tls {
            // Local unconfigured upstreams present self-signed certificates.
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| ProxyError::UpstreamClient(e.to_string()))?;

        let upstream = Arc::new(Upstream {
            client,
            base: self.base_url(),
        });
        let _ = self.upstream.set(Arc::clone(&upstream));
        Ok(Arc::clone(self.upstream.get().unwrap_or(&upstream)))
    }

    /// True when a proxy handle has been constructed.
    pub fn has_upstream(&self) -> bool {
        self.upstream.get().is_some()
    }
}

/// The `name -> service` map the router serves from.
#[derive(Default)]
pub struct ServiceTable {
    inner: RwLock<HashMap<String, Arc<ServiceEntry>>>,
}

impl ServiceTable {
    /// Looks up a service by exact host name.
    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.inner.read().get(name).cloned()
    }

    /// Publishes an entry under its name.
    pub fn insert(&self, entry: ServiceEntry) {
        self.inner
            .write()
            .insert(entry.name.clone(), Arc::new(entry));
    }

    /// Removes an entry by name.
    pub fn remove(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.inner.write().remove(name)
    }

    /// Moves an entry to a new name in one critical section.
    pub fn rename(&self, old_name: &str, entry: ServiceEntry) {
        let mut inner = self.inner.write();
        inner.remove(old_name);
        inner.insert(entry.name.clone(), Arc::new(entry));
    }

    /// All entries, unordered.
    pub fn list(&self) -> Vec<Arc<ServiceEntry>> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Everything the listeners and the discovery loop share.
pub struct AppState {
    pub table: ServiceTable,
    pub store: Arc<ServiceStore>,
    pub blacklist: Arc<BlacklistStore>,
    /// Name allocator; lock ordering is names before table.
    pub names: Mutex<NameGenerator>,
    pub notify: Arc<NotifyManager>,
    pub options: DaemonOptions,
    /// Client for the 2 s health probes; accepts self-signed upstreams.
    pub health_client: reqwest::Client,
}

/// Shared handle to [`AppState`].
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        store: Arc<ServiceStore>,
        blacklist: Arc<BlacklistStore>,
        names: NameGenerator,
        notify: Arc<NotifyManager>,
        options: DaemonOptions,
    ) -> SharedState {
        let health_client = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("health client construction is infallible with these options");

        Arc::new(Self {
            table: ServiceTable::default(),
            store,
            blacklist,
            names: Mutex::new(names),
            notify,
            options,
            health_client,
        })
    }

    /// Loads every stored record into the table and registers its name with
    /// the allocator, so rediscovery after a restart cannot collide.
    pub fn preload(&self) {
        let mut names = self.names.lock();
        for record in self.store.list() {
            names.mark_used(&record.name);
            self.table.insert(ServiceEntry::from_record(&record, ""));
        }
    }

    /// Preferred URL for a service under the current listener config.
    pub fn service_url(&self, name: &str) -> String {
        if self.options.tls_enabled {
            if self.options.https_port == 443 {
                format!("https://{name}")
            } else {
                format!("https://{name}:{}", self.options.https_port)
            }
        } else if self.options.http_port == 80 {
            format!("http://{name}")
        } else {
            format!("http://{name}:{}", self.options.http_port)
        }
    }

    /// Plain-HTTP URL for a service.
    pub fn http_service_url(&self, name: &str) -> String {
        if self.options.http_port == 80 {
            format!("http://{name}")
        } else {
            format!("http://{name}:{}", self.options.http_port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    /// Reqwest needs a process-wide rustls `CryptoProvider`; production
    /// installs it in `main`, so tests must do so themselves.
    fn ensure_crypto_provider() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        });
    }

    fn record(name: &str, port: u16, use_tls: bool) -> ServiceRecord {
        ServiceRecord {
            id: format!("id-{name}"),
            name: name.to_string(),
            port,
            target_host: String::new(),
            pid: 1,
            exe_path: "/usr/local/bin/myapp".to_string(),
            args: vec![],
            user_defined: false,
            is_active: true,
            last_seen: Utc::now(),
            keep: false,
            group: String::new(),
            use_tls,
            extra: Default::default(),
        }
    }

    #[test]
    fn entry_derives_group_and_target() {
        let entry = ServiceEntry::from_record(&record("myapp-2.localhost", 8000, false), "");
        assert_eq!(entry.group, "myapp");
        assert_eq!(entry.target_host, "127.0.0.1");
        assert_eq!(entry.base_url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn upstream_is_lazy_and_cached() {
        ensure_crypto_provider();
        let entry = ServiceEntry::from_record(&record("a.localhost", 8000, false), "");
        assert!(!entry.has_upstream());

        let first = entry.upstream().unwrap();
        let second = entry.upstream().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.base, "http://127.0.0.1:8000");
    }

    #[test]
    fn update_preserves_upstream_when_target_is_unchanged() {
        ensure_crypto_provider();
        let rec = record("a.localhost", 8000, false);
        let entry = ServiceEntry::from_record(&rec, "");
        let upstream = entry.upstream().unwrap();

        let mut bumped = rec.clone();
        bumped.pid = 99;
        let updated = entry.updated(&bumped, "/tmp");
        assert!(updated.has_upstream());
        assert!(Arc::ptr_eq(&upstream, &updated.upstream().unwrap()));
    }

    #[test]
    fn update_invalidates_upstream_on_scheme_or_port_change() {
        ensure_crypto_provider();
        let rec = record("a.localhost", 8000, false);
        let entry = ServiceEntry::from_record(&rec, "");
        entry.upstream().unwrap();

        let mut tls = rec.clone();
        tls.use_tls = true;
        assert!(!entry.updated(&tls, "").has_upstream());

        let mut moved = rec.clone();
        moved.port = 9000;
        assert!(!entry.updated(&moved, "").has_upstream());
    }

    #[test]
    fn table_rename_swaps_names_atomically() {
        let table = ServiceTable::default();
        table.insert(ServiceEntry::from_record(&record("old.localhost", 8000, false), ""));

        let renamed = ServiceEntry::from_record(&record("new.localhost", 8000, false), "");
        table.rename("old.localhost", renamed);

        assert!(table.get("old.localhost").is_none());
        assert!(table.get("new.localhost").is_some());
        assert_eq!(table.len(), 1);
    }
}
