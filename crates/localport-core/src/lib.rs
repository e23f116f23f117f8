//! localport Core - discovery pipeline building blocks.
//!
//! This crate contains the pieces the daemon composes into its discovery
//! loop, plus the notification plumbing:
//!
//! - `portscan` - enumerate listening TCP sockets with their owning process
//! - `probe` - classify a `(host, port)` as HTTP, HTTPS, or neither
//! - `naming` - rule-driven name generation with collision handling
//! - `identity` - the stable per-process identity hash
//! - `notify` - event filtering and desktop notification dispatch
//!
//! Everything here is independent of the proxy; the daemon crate wires these
//! into the periodic reconcile pass.

pub mod error;
pub mod identity;
pub mod naming;
pub mod notify;
pub mod portscan;
pub mod probe;

pub use error::{CoreError, Result};
pub use identity::identity_hash;
pub use naming::{NameGenerator, NamingRule, RuleEngine};
pub use notify::{EventType, Notification, NotifyConfig, NotifyManager};
pub use portscan::{Listener, PortScanner, SystemScanner};
pub use probe::{detect_protocol, Protocol};
