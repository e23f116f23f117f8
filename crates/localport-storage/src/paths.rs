//! Default locations for persisted state.
//!
//! All mutable configuration lives under the per-user config directory in a
//! `localport` subdirectory; certificate material lives in its own store
//! (default `~/.localtls`) because it outlives reconfiguration and carries
//! different permission requirements.

use std::path::PathBuf;

use directories::{BaseDirs, ProjectDirs};

/// Returns the localport config directory, creating nothing.
///
/// Falls back to the current directory when the platform provides no home.
pub fn config_dir() -> PathBuf {
    ProjectDirs::from("dev", "localport", "localport")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default path of the service store.
pub fn services_path() -> PathBuf {
    config_dir().join("services.json")
}

/// Default path of the blacklist store.
pub fn blacklist_path() -> PathBuf {
    config_dir().join("blacklist.json")
}

/// Default path of the user naming-rules overlay.
pub fn naming_rules_path() -> PathBuf {
    config_dir().join("naming-rules.json")
}

/// Default path of the notification config.
pub fn notify_config_path() -> PathBuf {
    config_dir().join("notify.json")
}

/// Default directory for CA material and issued certificates.
pub fn ca_store_path() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().join(".localtls"))
        .unwrap_or_else(|| PathBuf::from(".localtls"))
}
