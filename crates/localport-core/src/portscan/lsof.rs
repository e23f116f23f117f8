//! macOS scanner: `lsof` field output.
//!
//! `lsof -nP -iTCP -sTCP:LISTEN -F pn` emits one `p<pid>` line per process
//! followed by `n<addr>:<port>` lines for its listening sockets. Process
//! metadata comes from a second `lsof -p <pid> -F n` call (txt/cwd records)
//! and `ps` for the command line.

use std::collections::HashMap;
use std::process::Command;

use crate::error::{CoreError, Result};
use crate::portscan::Listener;

/// Scans for listening TCP sockets and their owning processes.
pub fn scan() -> Result<Vec<Listener>> {
    let output = Command::new("lsof")
        .args(["-nP", "-iTCP", "-sTCP:LISTEN", "-F", "pn"])
        .output()
        .map_err(|e| CoreError::Scan(format!("lsof failed: {e}")))?;
    if !output.status.success() {
        return Err(CoreError::Scan(format!(
            "lsof exited with {}",
            output.status
        )));
    }

    let ports = parse_listen_output(&String::from_utf8_lossy(&output.stdout));

    let mut listeners = Vec::with_capacity(ports.len());
    for (port, pid) in ports {
        // The process may have exited since the listing.
        if let Some((exe_path, cwd, args)) = process_info(pid) {
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

/// Parses `-F pn` output into port -> pid.
fn parse_listen_output(output: &str) -> HashMap<u16, u32> {
    let mut result = HashMap::new();
    let mut current_pid: Option<u32> = None;

    for line in output.lines() {
        match line.as_bytes().first() {
            Some(b'p') => current_pid = line[1..].parse().ok(),
            Some(b'n') => {
                if let (Some(pid), Some(port)) = (current_pid, parse_port(&line[1..])) {
                    result.insert(port, pid);
                }
            }
            _ => {}
        }
    }
    result
}

/// Extracts the port from an lsof address such as `127.0.0.1:3000`,
/// `*:3000`, or `[::1]:3000 (LISTEN)`.
fn parse_port(addr: &str) -> Option<u16> {
    let (_, port) = addr.rsplit_once(':')?;
    let port = port.split('(').next().unwrap_or(port).trim();
    port.parse().ok()
}

/// Reads exe, cwd, and argv for a pid; None when the process is gone.
fn process_info(pid: u32) -> Option<(String, String, Vec<String>)> {
    let output = Command::new("lsof")
        .args(["-p", &pid.to_string(), "-F", "n"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let (mut exe_path, mut cwd) = (String::new(), String::new());
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Some(rest) = line.strip_prefix("ntxt") {
            if exe_path.is_empty() {
                exe_path = rest.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("ncwd") {
            cwd = rest.to_string();
        }
    }

    if exe_path.is_empty() {
        exe_path = ps_field(pid, "comm=")?;
    }

    let args = ps_field(pid, "args=")
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    Some((exe_path, cwd, args))
}

fn ps_field(pid: u32, field: &str) -> Option<String> {
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", field])
        .output()
        .ok()?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_and_port_pairs() {
        let output = "p312\nnlocalhost:0\nn127.0.0.1:3000\np845\nn*:8080\nn[::1]:8081\n";
        let ports = parse_listen_output(output);
        assert_eq!(ports.get(&3000), Some(&312));
        assert_eq!(ports.get(&8080), Some(&845));
        assert_eq!(ports.get(&8081), Some(&845));
    }

    #[test]
    fn port_parsing_handles_lsof_shapes() {
        assert_eq!(parse_port("127.0.0.1:3000"), Some(3000));
        assert_eq!(parse_port("*:8080"), Some(8080));
        assert_eq!(parse_port("[::1]:8081"), Some(8081));
        assert_eq!(parse_port("[fe80::1%lo0]:9000 (LISTEN)"), Some(9000));
        assert_eq!(parse_port("no-port-here"), None);
    }
}
