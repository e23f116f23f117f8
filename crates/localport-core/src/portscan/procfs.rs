//! Linux scanner: kernel socket tables under `/proc`.
//!
//! `/proc/net/tcp` and `/proc/net/tcp6` list sockets with their state and
//! inode; resolving an inode back to a process means sweeping every
//! `/proc/<pid>/fd` directory for a `socket:[inode]` symlink. Process
//! metadata then comes from `/proc/<pid>/{exe,cwd,cmdline}`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::portscan::Listener;

/// TCP state code for LISTEN in the kernel tables.
const STATE_LISTEN: &str = "0A";

/// Scans for listening TCP sockets and their owning processes.
pub fn scan() -> Result<Vec<Listener>> {
    scan_root(Path::new("/proc"))
}

/// Same as [`scan`] but rooted at an arbitrary directory, for tests.
fn scan_root(proc_root: &Path) -> Result<Vec<Listener>> {
    let mut inodes = parse_tcp_table(&fs::read_to_string(proc_root.join("net/tcp")).map_err(
        |e| CoreError::Scan(format!("read {}: {e}", proc_root.join("net/tcp").display())),
    )?);

    // IPv6 table is optional; a v4 port wins when both exist.
    if let Ok(v6) = fs::read_to_string(proc_root.join("net/tcp6")) {
        for (port, inode) in parse_tcp_table(&v6) {
            inodes.entry(port).or_insert(inode);
        }
    }

    let pids = map_inodes_to_pids(proc_root, &inodes)?;

    let mut listeners = Vec::with_capacity(pids.len());
    for (port, pid) in pids {
        // The process may have exited between the table read and here.
        if let Some((exe_path, cwd, args)) = process_info(proc_root, pid) {
            listeners.push(Listener {
                port,
                pid,
                exe_path,
                cwd,
                args,
            });
        }
    }
    Ok(listeners)
}

/// Parses a `/proc/net/tcp`-format table into port -> socket inode.
fn parse_tcp_table(table: &str) -> HashMap<u16, u64> {
    let mut result = HashMap::new();

    // First line is the column header.
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || fields[3] != STATE_LISTEN {
            continue;
        }

        // local_address is "0100007F:0050" (hex ip:port).
        let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        let Ok(port) = u16::from_str_radix(port_hex, 16) else {
            continue;
        };

        let Ok(inode) = fields[9].parse::<u64>() else {
            continue;
        };
        if inode == 0 {
            continue;
        }

        result.insert(port, inode);
    }
    result
}

/// Sweeps `/proc/<pid>/fd` directories to find which pid owns each inode.
fn map_inodes_to_pids(proc_root: &Path, inodes: &HashMap<u16, u64>) -> Result<HashMap<u16, u32>> {
    let mut result = HashMap::new();

    let entries = fs::read_dir(proc_root)
        .map_err(|e| CoreError::Scan(format!("read {}: {e}", proc_root.display())))?;

    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };

        // Unreadable fd dirs (permissions, exited process) are skipped.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };

        for fd in fds.flatten() {
            let Ok(link) = fs::read_link(fd.path()) else {
                continue;
            };
            let link = link.to_string_lossy();
            let Some(inode_str) = link
                .strip_prefix("socket:[")
                .and_then(|s| s.strip_suffix(']'))
            else {
                continue;
            };
            let Ok(inode) = inode_str.parse::<u64>() else {
                continue;
            };

            for (port, listen_inode) in inodes {
                if *listen_inode == inode {
                    result.insert(*port, pid);
                    break;
                }
            }
        }
    }
    Ok(result)
}

/// Reads exe, cwd, and argv for a pid; None when the process is gone.
fn process_info(proc_root: &Path, pid: u32) -> Option<(String, String, Vec<String>)> {
    let pid_dir = proc_root.join(pid.to_string());

    let exe_path = fs::read_link(pid_dir.join("exe"))
        .ok()?
        .to_string_lossy()
        .into_owned();

    let cwd = fs::read_link(pid_dir.join("cwd"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let args = match fs::read(pid_dir.join("cmdline")) {
        Ok(raw) => raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };

    Some((exe_path, cwd, args))
}
