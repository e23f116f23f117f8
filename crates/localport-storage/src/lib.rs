//! localport Storage - JSON persistence layer.
//!
//! This crate provides the durable state for the localport daemon:
//!
//! - [`ServiceStore`] - discovered and manually added service records
//! - [`BlacklistStore`] - user rules for hiding services from discovery
//! - [`atomic::write_atomic`] - the shared atomic-write recipe every store
//!   (and the certificate authority) uses
//!
//! Both stores are in-memory maps persisted as pretty-printed JSON documents
//! under the per-user config directory. Writes go through a temp file in the
//! target directory followed by a rename, so a crash mid-write never leaves a
//! truncated document behind.
//!
//! # Example
//!
//! ```no_run
//! use localport_storage::{ServiceStore, paths};
//!
//! let store = ServiceStore::open(paths::services_path()).unwrap();
//! for record in store.list() {
//!     println!("{} -> {}:{}", record.name, record.effective_target_host(), record.port);
//! }
//! ```

pub mod atomic;
mod blacklist;
pub mod error;
pub mod paths;
mod store;

pub use blacklist::{BlacklistEntry, BlacklistStore, BlacklistType};
pub use error::{Result, StorageError};
pub use store::{ServiceRecord, ServiceStore};
