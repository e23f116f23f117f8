//! Blacklist store.
//!
//! Decides which listening processes discovery should ignore. Two layers: a
//! built-in set of system rules (the daemon's own binaries and OS service
//! path prefixes) and user entries persisted at `<config>/blacklist.json`.
//!
//! Scripts launched through a language interpreter are a special case: the
//! interpreter usually lives under a system prefix, but the script is the
//! user's. When the executable is a known interpreter and its script argument
//! points into a user directory, the built-in path rules are skipped so the
//! service stays visible; user entries still apply.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::error::{Result, StorageError};

/// Path prefixes that are always blacklisted (OS services, not dev servers).
const BUILTIN_PATH_PREFIXES: &[&str] = &[
    "/usr/libexec/",
    "/usr/lib/",
    "/private/var/",
    "/var/",
    "/opt/X11/",
];

/// Executable names belonging to localport itself.
const BUILTIN_NAMES: &[&str] = &["localportd", "localport"];

/// Known language interpreters, matched by basename prefix.
const INTERPRETERS: &[&str] = &[
    "python", "python3", "node", "nodejs", "ruby", "perl", "php", "java",
];

/// Directories whose contents count as user scripts.
const USER_PATH_PREFIXES: &[&str] = &["/home/", "/Users/", "/tmp/", "/var/tmp/"];

/// What a blacklist entry matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistType {
    /// Exact process id.
    Pid,
    /// Exact executable path or path prefix.
    Path,
    /// Regex tested against the exe path and the joined argv.
    Pattern,
}

impl std::fmt::Display for BlacklistType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlacklistType::Pid => f.write_str("pid"),
            BlacklistType::Path => f.write_str("path"),
            BlacklistType::Pattern => f.write_str("pattern"),
        }
    }
}

impl std::str::FromStr for BlacklistType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pid" => Ok(BlacklistType::Pid),
            "path" => Ok(BlacklistType::Path),
            "pattern" => Ok(BlacklistType::Pattern),
            other => Err(StorageError::InvalidEntry(format!(
                "unknown type {other:?} (must be pid, path, or pattern)"
            ))),
        }
    }
}

/// A user-defined blacklist rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entry_type: BlacklistType,
    pub value: String,
    pub created_at: DateTime<Utc>,
    /// Fields written by other (newer) versions; preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

struct BlacklistInner {
    entries: Vec<BlacklistEntry>,
    /// Compiled pattern cache, keyed by entry id.
    patterns: HashMap<String, Regex>,
}

/// Durable store of [`BlacklistEntry`]s, combined with the built-in rules.
pub struct BlacklistStore {
    path: PathBuf,
    inner: RwLock<BlacklistInner>,
}

impl BlacklistStore {
    /// Opens the store at `path`, loading existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries: Vec<BlacklistEntry> = Vec::new();

        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            entries = serde_json::from_str(&data).map_err(|source| StorageError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        }

        let mut patterns = HashMap::new();
        for e in &entries {
            if e.entry_type == BlacklistType::Pattern {
                if let Ok(re) = Regex::new(&e.value) {
                    patterns.insert(e.id.clone(), re);
                }
            }
        }

        Ok(Self {
            path,
            inner: RwLock::new(BlacklistInner { entries, patterns }),
        })
    }

    /// Adds and persists an entry after validating its value.
    pub fn add(&self, entry_type: BlacklistType, value: &str) -> Result<BlacklistEntry> {
        match entry_type {
            BlacklistType::Pid => {
                value.parse::<u32>().map_err(|_| {
                    StorageError::InvalidEntry(format!("invalid PID value: {value}"))
                })?;
            }
            BlacklistType::Pattern => {
                Regex::new(value).map_err(|e| {
                    StorageError::InvalidEntry(format!("invalid regex pattern: {e}"))
                })?;
            }
            BlacklistType::Path => {}
        }

        let entry = BlacklistEntry {
            id: generate_id(),
            entry_type,
            value: value.to_string(),
            created_at: Utc::now(),
            extra: serde_json::Map::new(),
        };

        let mut inner = self.inner.write();
        inner.entries.push(entry.clone());
        if entry_type == BlacklistType::Pattern {
            // Validated above.
            if let Ok(re) = Regex::new(value) {
                inner.patterns.insert(entry.id.clone(), re);
            }
        }

        if let Err(e) = persist(&self.path, &inner.entries) {
            inner.entries.pop();
            inner.patterns.remove(&entry.id);
            return Err(e);
        }
        Ok(entry)
    }

    /// Removes an entry by id.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StorageError::EntryNotFound(id.to_string()))?;

        let removed = inner.entries.remove(idx);
        let pattern = inner.patterns.remove(id);

        if let Err(e) = persist(&self.path, &inner.entries) {
            inner.entries.insert(idx, removed);
            if let Some(re) = pattern {
                inner.patterns.insert(id.to_string(), re);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Returns all user entries.
    pub fn list(&self) -> Vec<BlacklistEntry> {
        self.inner.read().entries.clone()
    }

    /// True when a process with this executable and argv should be hidden.
    ///
    /// Combines the built-in system rules with user entries; pid entries are
    /// checked separately via [`Self::is_blacklisted_pid`].
    pub fn is_blacklisted(&self, exe_path: &str, args: &[String]) -> bool {
        let exe_name = basename(exe_path);

        if BUILTIN_NAMES.contains(&exe_name) || exe_name.starts_with("localport") {
            return true;
        }

        // Interpreter running a user script: skip the built-in path rules so
        // `python3 /home/me/app.py` under /usr/bin stays visible.
        let user_script = is_interpreter(exe_name)
            && args.len() > 1
            && USER_PATH_PREFIXES.iter().any(|p| args[1].starts_with(p));

        if !user_script {
            for prefix in BUILTIN_PATH_PREFIXES {
                if exe_path.starts_with(prefix) && !exe_path.starts_with("/Applications/") {
                    return true;
                }
            }
        }

        let inner = self.inner.read();
        let joined = args.join(" ");
        for entry in &inner.entries {
            match entry.entry_type {
                // Checked at the caller with the actual pid.
                BlacklistType::Pid => continue,
                BlacklistType::Path => {
                    if exe_path == entry.value || exe_path.starts_with(&entry.value) {
                        return true;
                    }
                }
                BlacklistType::Pattern => {
                    if let Some(re) = inner.patterns.get(&entry.id) {
                        if re.is_match(exe_path) || (!joined.is_empty() && re.is_match(&joined)) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// True when a user entry blacklists this pid.
    pub fn is_blacklisted_pid(&self, pid: u32) -> bool {
        let pid = pid.to_string();
        self.inner
            .read()
            .entries
            .iter()
            .any(|e| e.entry_type == BlacklistType::Pid && e.value == pid)
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn persist(path: &Path, entries: &[BlacklistEntry]) -> Result<()> {
    let data = serde_json::to_vec_pretty(entries)?;
    write_atomic(path, &data, 0o644)?;
    Ok(())
}

fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_interpreter(exe_name: &str) -> bool {
    INTERPRETERS
        .iter()
        .any(|i| exe_name == *i || exe_name.starts_with(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, BlacklistStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlacklistStore::open(dir.path().join("blacklist.json")).unwrap();
        (dir, store)
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn own_binaries_are_always_hidden() {
        let (_dir, store) = open_temp();
        assert!(store.is_blacklisted("/usr/local/bin/localportd", &args(&["localportd"])));
        assert!(store.is_blacklisted("/usr/local/bin/localport", &args(&["localport"])));
    }

    #[test]
    fn system_paths_are_hidden_but_applications_are_not() {
        let (_dir, store) = open_temp();
        assert!(store.is_blacklisted("/usr/libexec/sshd-keygen", &[]));
        assert!(store.is_blacklisted("/var/lib/thing/agent", &[]));
        assert!(!store.is_blacklisted("/Applications/Ollama.app/Contents/MacOS/Ollama", &[]));
        assert!(!store.is_blacklisted("/usr/local/bin/myserver", &[]));
    }

    #[test]
    fn interpreter_running_user_script_stays_visible() {
        let (_dir, store) = open_temp();
        // Interpreter under a system prefix, script in the user's home.
        assert!(!store.is_blacklisted(
            "/usr/lib/python3/python3",
            &args(&["python3", "/home/dev/app/server.py"])
        ));
        // Same interpreter running a system script stays hidden.
        assert!(store.is_blacklisted(
            "/usr/lib/python3/python3",
            &args(&["python3", "/usr/lib/cups/daemon.py"])
        ));
    }

    #[test]
    fn pattern_matches_exe_and_args() {
        let (_dir, store) = open_temp();
        store.add(BlacklistType::Pattern, "^/opt/evil/").unwrap();

        assert!(store.is_blacklisted("/opt/evil/server", &args(&["server"])));
        assert!(store.is_blacklisted(
            "/usr/bin/env",
            &args(&["env", "/opt/evil/run.sh"])
        ));
        assert!(!store.is_blacklisted("/opt/good/server", &[]));
    }

    #[test]
    fn path_entry_matches_exact_and_prefix() {
        let (_dir, store) = open_temp();
        store.add(BlacklistType::Path, "/srv/hidden").unwrap();

        assert!(store.is_blacklisted("/srv/hidden", &[]));
        assert!(store.is_blacklisted("/srv/hidden/bin/app", &[]));
        assert!(!store.is_blacklisted("/srv/visible/app", &[]));
    }

    #[test]
    fn pid_entries_match_only_pids() {
        let (_dir, store) = open_temp();
        store.add(BlacklistType::Pid, "1234").unwrap();

        assert!(store.is_blacklisted_pid(1234));
        assert!(!store.is_blacklisted_pid(1235));
        assert!(!store.is_blacklisted("/usr/local/bin/app", &args(&["1234"])));
    }

    #[test]
    fn add_validates_values() {
        let (_dir, store) = open_temp();
        assert!(matches!(
            store.add(BlacklistType::Pid, "not-a-number"),
            Err(StorageError::InvalidEntry(_))
        ));
        assert!(matches!(
            store.add(BlacklistType::Pattern, "(unclosed"),
            Err(StorageError::InvalidEntry(_))
        ));
    }

    #[test]
    fn entries_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.json");

        let entry = {
            let store = BlacklistStore::open(&path).unwrap();
            store.add(BlacklistType::Pattern, "^/opt/evil/").unwrap()
        };

        let store = BlacklistStore::open(&path).unwrap();
        assert_eq!(store.list(), vec![entry]);
        assert!(store.is_blacklisted("/opt/evil/server", &[]));
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.json");

        std::fs::write(
            &path,
            r#"[{
                "id": "abcd1234abcd1234",
                "type": "path",
                "value": "/srv/hidden",
                "created_at": "2026-01-01T00:00:00Z",
                "comment": "added during the incident"
            }]"#,
        )
        .unwrap();

        let store = BlacklistStore::open(&path).unwrap();
        assert_eq!(
            store.list()[0].extra["comment"],
            "added during the incident"
        );

        // Persisting through an unrelated mutation keeps the extra field.
        store.add(BlacklistType::Pid, "99").unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("added during the incident"));
    }

    #[test]
    fn remove_deletes_by_id() {
        let (_dir, store) = open_temp();
        let entry = store.add(BlacklistType::Path, "/srv/hidden").unwrap();

        store.remove(&entry.id).unwrap();
        assert!(store.list().is_empty());
        assert!(matches!(
            store.remove(&entry.id),
            Err(StorageError::EntryNotFound(_))
        ));
    }
}
