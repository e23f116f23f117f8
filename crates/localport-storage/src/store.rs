//! Service record store.
//!
//! Maps a stable process identity to its assigned `.localhost` name plus the
//! runtime details discovery keeps fresh. Persisted as a JSON array at
//! `<config>/services.json`; the file is the source of truth across daemon
//! restarts, so names survive process churn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{Result, StorageError};

/// A persisted service mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Stable identity: hash of canonical exe path and argv for discovered
    /// services, synthetic `manual-...` id for manual entries.
    pub id: String,
    /// Assigned DNS name, always ending in `.localhost`.
    pub name: String,
    /// Current target port.
    pub port: u16,
    /// Target host; empty means 127.0.0.1 (see [`Self::effective_target_host`]).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_host: String,
    /// Owning process id; 0 for manual entries.
    pub pid: u32,
    /// Canonical executable path, or `"manual"`.
    pub exe_path: String,
    /// Command line of the owning process.
    pub args: Vec<String>,
    /// True when the name was set by the user (rename or manual add).
    pub user_defined: bool,
    /// True when the last discovery pass saw this identity listening.
    pub is_active: bool,
    /// Timestamp of the most recent observation.
    pub last_seen: DateTime<Utc>,
    /// Keep the record listed even while inactive.
    pub keep: bool,
    /// Display group, e.g. `ollama` for `ollama.localhost` and
    /// `ollama-1.localhost`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// True when the upstream itself speaks TLS.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_tls: bool,
    /// Fields written by other (newer) versions; preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceRecord {
    /// Returns the target host, defaulting to 127.0.0.1.
    pub fn effective_target_host(&self) -> &str {
        if self.target_host.is_empty() {
            "127.0.0.1"
        } else {
            &self.target_host
        }
    }
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<String, ServiceRecord>,
    /// name -> id secondary index.
    names: HashMap<String, String>,
}

/// Durable store of [`ServiceRecord`]s.
///
/// All operations take `&self`; the store owns its lock and persists while it
/// is held, so callers observe each mutation as atomic. When a persist fails,
/// the in-memory maps are rolled back to match the document on disk.
pub struct ServiceStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl ServiceStore {
    /// Opens the store at `path`, loading existing records.
    ///
    /// A missing file is not an error; a file that fails to parse is.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut inner = StoreInner::default();

        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            let records: Vec<ServiceRecord> =
                serde_json::from_str(&data).map_err(|source| StorageError::Malformed {
                    path: path.display().to_string(),
                    source,
                })?;
            for r in records {
                inner.names.insert(r.name.clone(), r.id.clone());
                inner.records.insert(r.id.clone(), r);
            }
        }

        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    /// Returns the record with the given id.
    pub fn get(&self, id: &str) -> Option<ServiceRecord> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Returns the record bound to the given name.
    pub fn get_by_name(&self, name: &str) -> Option<ServiceRecord> {
        let inner = self.inner.lock();
        let id = inner.names.get(name)?;
        inner.records.get(id).cloned()
    }

    /// True when no record is bound to `name`.
    pub fn is_name_available(&self, name: &str) -> bool {
        !self.inner.lock().names.contains_key(name)
    }

    /// Stores or replaces a record, maintaining the name index.
    pub fn save(&self, record: ServiceRecord) -> Result<()> {
        let mut inner = self.inner.lock();

        let previous = inner.records.get(&record.id).cloned();
        if let Some(old) = &previous {
            inner.names.remove(&old.name);
        }
        inner.names.insert(record.name.clone(), record.id.clone());
        inner.records.insert(record.id.clone(), record.clone());

        if let Err(e) = persist(&self.path, &inner) {
            // Roll back so memory matches disk.
            inner.names.remove(&record.name);
            inner.records.remove(&record.id);
            if let Some(old) = previous {
                inner.names.insert(old.name.clone(), old.id.clone());
                inner.records.insert(old.id.clone(), old);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Renames a record, marking it user-defined.
    ///
    /// Fails when the new name is already bound to a different id.
    pub fn update_name(&self, id: &str, new_name: &str) -> Result<ServiceRecord> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.names.get(new_name) {
            if existing != id {
                return Err(StorageError::NameInUse(new_name.to_string()));
            }
        }
        let record = inner
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;

        let old_name = record.name.clone();
        inner.names.remove(&old_name);
        inner.names.insert(new_name.to_string(), id.to_string());
        {
            let r = inner.records.get_mut(id).expect("checked above");
            r.name = new_name.to_string();
            r.user_defined = true;
        }

        if let Err(e) = persist(&self.path, &inner) {
            inner.names.remove(new_name);
            inner.names.insert(old_name.clone(), id.to_string());
            let r = inner.records.get_mut(id).expect("checked above");
            r.name = old_name;
            r.user_defined = record.user_defined;
            return Err(e);
        }
        Ok(inner.records.get(id).cloned().expect("checked above"))
    }

    /// Updates the keep flag of a record.
    pub fn update_keep(&self, id: &str, keep: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let old = {
            let r = inner
                .records
                .get_mut(id)
                .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;
            let old = r.keep;
            r.keep = keep;
            old
        };

        if let Err(e) = persist(&self.path, &inner) {
            inner.records.get_mut(id).expect("checked above").keep = old;
            return Err(e);
        }
        Ok(())
    }

    /// Removes a record by id.
    pub fn remove(&self, id: &str) -> Result<ServiceRecord> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .remove(id)
            .ok_or_else(|| StorageError::RecordNotFound(id.to_string()))?;
        inner.names.remove(&record.name);

        if let Err(e) = persist(&self.path, &inner) {
            inner.names.insert(record.name.clone(), record.id.clone());
            inner.records.insert(record.id.clone(), record);
            return Err(e);
        }
        Ok(record)
    }

    /// Removes a record by its assigned name.
    pub fn remove_by_name(&self, name: &str) -> Result<ServiceRecord> {
        let id = self
            .inner
            .lock()
            .names
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::ServiceNotFound(name.to_string()))?;
        self.remove(&id)
    }

    /// Adds a manual entry for a service that is not (yet) running.
    ///
    /// Manual entries are user-defined, kept, inactive, and carry pid 0 with
    /// `"manual"` as their executable path.
    pub fn add_manual(&self, name: &str, port: u16, target_host: &str) -> Result<ServiceRecord> {
        let target_host = if target_host.is_empty() {
            "127.0.0.1"
        } else {
            target_host
        };
        if !self.is_name_available(name) {
            return Err(StorageError::NameInUse(name.to_string()));
        }

        let record = ServiceRecord {
            id: format!("manual-{name}-{target_host}-{port}"),
            name: name.to_string(),
            port,
            target_host: target_host.to_string(),
            pid: 0,
            exe_path: "manual".to_string(),
            args: Vec::new(),
            user_defined: true,
            is_active: false,
            last_seen: Utc::now(),
            keep: true,
            group: String::new(),
            use_tls: false,
            extra: serde_json::Map::new(),
        };
        self.save(record.clone())?;
        Ok(record)
    }

    /// Returns all records, in no particular order.
    pub fn list(&self) -> Vec<ServiceRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persist(path: &Path, inner: &StoreInner) -> Result<()> {
    let mut records: Vec<&ServiceRecord> = inner.records.values().collect();
    records.sort_by(|a, b| a.name.cmp(&b.name));
    let data = serde_json::to_vec_pretty(&records)?;
    write_atomic(path, &data, 0o644)?;
    Ok(())
}
