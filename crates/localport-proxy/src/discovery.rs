//! Discovery loop.
//!
//! Fixed-interval reconciliation between the machine's listening sockets and
//! the service table: scan, filter (own ports, blacklist, non-HTTP), hash
//! identities, update or create records, then deactivate everything that
//! disappeared. The scanner is injected so tests can drive the loop with
//! fabricated listeners.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use localport_core::identity::identity_hash;
use localport_core::naming::extract_group_from_exe;
use localport_core::portscan::{Listener, PortScanner};
use localport_core::probe::{detect_protocol, Protocol};
use localport_storage::ServiceRecord;

use crate::state::{ServiceEntry, SharedState};

/// Target host every discovered service is probed and proxied on.
const DISCOVERED_TARGET: &str = "127.0.0.1";

/// Periodically reconciles the service table against live listeners.
pub struct DiscoveryLoop {
    state: SharedState,
    scanner: Arc<dyn PortScanner>,
}

impl DiscoveryLoop {
    pub fn new(state: SharedState, scanner: Arc<dyn PortScanner>) -> Self {
        Self { state, scanner }
    }

    /// Runs forever on the configured interval; the first pass is immediate.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.state.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.pass().await;
        }
    }

    /// One reconcile pass.
    pub async fn pass(&self) {
        let scanner = Arc::clone(&self.scanner);
        let listeners = match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(Ok(listeners)) => listeners,
            Ok(Err(e)) => {
                // State stays untouched; next tick retries.
                warn!("port scan failed: {e}");
                return;
            }
            Err(e) => {
                warn!("port scan task failed: {e}");
                return;
            }
        };

        let mut seen_names: HashSet<String> = HashSet::new();

        for listener in listeners {
            if listener.port == self.state.options.http_port
                || listener.port == self.state.options.https_port
            {
                continue;
            }
            if self
                .state
                .blacklist
                .is_blacklisted(&listener.exe_path, &listener.args)
                || self.state.blacklist.is_blacklisted_pid(listener.pid)
            {
                continue;
            }

            let proto = detect_protocol(DISCOVERED_TARGET, listener.port).await;
            if proto == Protocol::None {
                debug!(port = listener.port, "listener is not HTTP, skipping");
                continue;
            }
            let use_tls = proto == Protocol::Https;

            let id = identity_hash(&listener.exe_path, &listener.args);
            match self.state.store.get(&id) {
                Some(record) => {
                    seen_names.insert(record.name.clone());
                    self.refresh_known(record, &listener, use_tls);
                }
                None => {
                    if let Some(name) = self.register_new(&id, &listener, use_tls) {
                        seen_names.insert(name);
                    }
                }
            }
        }

        self.deactivate_unseen(&seen_names);
    }

    /// Updates a known identity: port, pid, protocol, activity.
    fn refresh_known(&self, mut record: ServiceRecord, listener: &Listener, use_tls: bool) {
        let reactivated = !record.is_active;
        let needs_save = record.port != listener.port
            || record.pid != listener.pid
            || record.use_tls != use_tls
            || reactivated;

        record.port = listener.port;
        record.pid = listener.pid;
        record.use_tls = use_tls;
        record.is_active = true;
        record.last_seen = Utc::now();

        if needs_save {
            if reactivated {
                info!(name = %record.name, "service reactivated");
            }
            if let Err(e) = self.state.store.save(record.clone()) {
                warn!(name = %record.name, "failed to update service: {e}");
            }
        }

        // Replace the runtime entry; the upstream handle survives unless the
        // target or scheme changed.
        match self.state.table.get(&record.name) {
            Some(existing) => self
                .state
                .table
                .insert(existing.updated(&record, &listener.cwd)),
            None => self
                .state
                .table
                .insert(ServiceEntry::from_record(&record, &listener.cwd)),
        }
    }

    /// Names, persists, and publishes a newly discovered identity.
    fn register_new(&self, id: &str, listener: &Listener, use_tls: bool) -> Option<String> {
        // Name allocation and table insertion share the allocator's critical
        // section so a concurrent rename cannot take the same name.
        let mut names = self.state.names.lock();
        let name = names.generate(
            &listener.exe_path,
            &listener.cwd,
            &listener.args,
            listener.port,
        );

        let record = ServiceRecord {
            id: id.to_string(),
            name: name.clone(),
            port: listener.port,
            target_host: String::new(),
            pid: listener.pid,
            exe_path: listener.exe_path.clone(),
            args: listener.args.clone(),
            user_defined: false,
            is_active: true,
            last_seen: Utc::now(),
            keep: false,
            group: extract_group_from_exe(&listener.exe_path, &name),
            use_tls,
            extra: Default::default(),
        };

        if let Err(e) = self.state.store.save(record.clone()) {
            warn!(name = %name, "failed to save new service: {e}");
            names.release(&name);
            return None;
        }
        self.state
            .table
            .insert(ServiceEntry::from_record(&record, &listener.cwd));
        drop(names);

        info!(
            name = %record.name,
            port = record.port,
            exe = %record.exe_path,
            scheme = if use_tls { "https" } else { "http" },
            "new service"
        );
        self.state
            .notify
            .service_discovered(&record.name, record.port, &self.state.service_url(&record.name));
        Some(name)
    }

    /// Flips services that vanished this pass to inactive.
    fn deactivate_unseen(&self, seen_names: &HashSet<String>) {
        let now = Utc::now();
        for entry in self.state.table.list() {
            if !entry.is_active || seen_names.contains(&entry.name) {
                continue;
            }

            if let Some(mut record) = self.state.store.get(&entry.id) {
                if record.is_active {
                    record.is_active = false;
                    record.last_seen = now;
                    if let Err(e) = self.state.store.save(record.clone()) {
                        warn!(name = %record.name, "failed to deactivate service: {e}");
                    }
                    self.state
                        .table
                        .insert(entry.updated(&record, &entry.cwd));

                    info!(name = %record.name, "service inactive");
                    self.state.notify.service_offline(&record.name);
                }
            }
        }
    }
}
