//! localport Proxy - the daemon's serving half.
//!
//! Owns the shared service table, runs the discovery loop that keeps it in
//! sync with reality, and serves two listeners (plaintext and TLS) that
//! route by Host header: admin hosts get the dashboard and JSON API,
//! everything else is reverse-proxied to the matching service.
//!
//! ## Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use localport_core::SystemScanner;
//! use localport_proxy::DiscoveryLoop;
//!
//! # async fn run(state: localport_proxy::SharedState) -> localport_proxy::Result<()> {
//! let discovery = DiscoveryLoop::new(Arc::clone(&state), Arc::new(SystemScanner));
//! tokio::spawn(discovery.run());
//! localport_proxy::server::run(state, None).await
//! # }
//! ```

pub mod api;
pub mod dashboard;
pub mod discovery;
pub mod error;
pub mod router;
pub mod server;
pub mod state;

pub use discovery::DiscoveryLoop;
pub use error::{ApiError, ProxyError, Result};
pub use state::{AppState, DaemonOptions, ServiceEntry, ServiceTable, SharedState};
