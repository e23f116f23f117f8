//! Listening-socket discovery.
//!
//! Produces a snapshot of every TCP socket in LISTEN state together with the
//! owning process's pid, executable path, working directory, and argv. Two
//! strategies exist behind the [`PortScanner`] trait:
//!
//! - [`procfs`] reads the kernel tables under `/proc` directly (Linux)
//! - [`lsof`] parses the field output of the `lsof` utility (macOS)
//!
//! Per-process metadata reads can fail at any time because the process may
//! exit mid-scan; those listeners are silently skipped. Failing to read the
//! socket table itself aborts the scan with an error.

#[cfg(target_os = "macos")]
pub mod lsof;
#[cfg(target_os = "linux")]
pub mod procfs;

use crate::error::Result;

/// A process listening on a local TCP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub port: u16,
    pub pid: u32,
    /// Canonical executable path (symlinks resolved where the platform
    /// exposes them).
    pub exe_path: String,
    /// Working directory; empty when unavailable.
    pub cwd: String,
    /// Full command line.
    pub args: Vec<String>,
}

/// A source of listening-socket snapshots.
///
/// The daemon injects this, which also lets tests drive the discovery loop
/// with fabricated listeners.
pub trait PortScanner: Send + Sync {
    /// Returns a complete snapshot of current listeners.
    fn scan(&self) -> Result<Vec<Listener>>;
}

/// The platform-appropriate scanner.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemScanner;

impl PortScanner for SystemScanner {
    fn scan(&self) -> Result<Vec<Listener>> {
        #[cfg(target_os = "linux")]
        {
            procfs::scan()
        }
        #[cfg(target_os = "macos")]
        {
            lsof::scan()
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Err(crate::error::CoreError::UnsupportedPlatform)
        }
    }
}
