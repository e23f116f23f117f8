//! Service management: list, rename, keep, add, remove.

use std::collections::HashMap;

use anyhow::{bail, Result};

use localport_core::naming::extract_group;
use localport_storage::{ServiceRecord, ServiceStore};

use super::ensure_localhost_suffix;

pub fn list(store: &ServiceStore) -> Result<()> {
    let mut records = store.list();
    if records.is_empty() {
        println!("No services registered.");
        println!("Start the daemon and run some local HTTP services.");
        return Ok(());
    }

    for record in &mut records {
        if record.group.is_empty() {
            record.group = extract_group(&record.name);
        }
    }
    records.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));

    let mut group_counts: HashMap<&str, usize> = HashMap::new();
    for record in &records {
        *group_counts.entry(record.group.as_str()).or_default() += 1;
    }

    println!(
        "{:<30} {:<22} {:<8} {:<6} {}",
        "NAME", "TARGET", "PID", "KEEP", "COMMAND"
    );
    println!("{}", "-".repeat(110));

    let mut last_group = "";
    for record in &records {
        let count = group_counts[record.group.as_str()];
        if record.group != last_group && count > 1 {
            println!("\n  [{}] ({count} services)", record.group);
        }
        last_group = &record.group;

        let mut markers = String::new();
        if record.user_defined {
            markers.push('*');
        }
        if record.keep {
            markers.push('K');
        }

        let name = if count > 1 {
            format!("  {}", record.name)
        } else {
            record.name.clone()
        };
        let target = format!("{}:{}", record.effective_target_host(), record.port);
        let keep = if record.keep { "YES" } else { "" };

        println!(
            "{:<30} {:<22} {:<8} {:<6} {}{}",
            name,
            target,
            record.pid,
            keep,
            markers,
            command_line(record)
        );
    }

    println!();
    println!("* = user-defined name, K = kept");
    Ok(())
}

fn command_line(record: &ServiceRecord) -> String {
    let mut command = record.exe_path.clone();
    if record.args.len() > 1 {
        command = format!("{} {}", command, record.args[1..].join(" "));
    }
    if command.len() > 50 {
        command.truncate(47);
        command.push_str("...");
    }
    command
}

pub fn rename(store: &ServiceStore, old: &str, new: &str) -> Result<()> {
    let old = ensure_localhost_suffix(old);
    let new = ensure_localhost_suffix(new);

    let Some(record) = store.get_by_name(&old) else {
        bail!("service not found: {old}");
    };
    store.update_name(&record.id, &new)?;

    println!("Renamed {old} -> {new}");
    println!("Note: the running daemon picks this up on restart; use the dashboard to rename live.");
    Ok(())
}

pub fn keep(store: &ServiceStore, name: &str, keep: bool) -> Result<()> {
    let name = ensure_localhost_suffix(name);
    let Some(record) = store.get_by_name(&name) else {
        bail!("service not found: {name}");
    };
    store.update_keep(&record.id, keep)?;

    println!(
        "Keep {} for {name}",
        if keep { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn add(store: &ServiceStore, name: &str, target: &str) -> Result<()> {
    let name = ensure_localhost_suffix(name);
    let (host, port) = parse_target(target)?;

    let record = store.add_manual(&name, port, host)?;
    println!(
        "Added manual service: {} -> {}:{}",
        record.name,
        record.effective_target_host(),
        record.port
    );
    println!("This service will be kept even when not running.");
    Ok(())
}

/// Parses `[host:]<port>`.
fn parse_target(target: &str) -> Result<(&str, u16)> {
    match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid port number in {target}"))?;
            Ok((host, port))
        }
        None => {
            let port = target
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid port number: {target}"))?;
            Ok(("", port))
        }
    }
}

pub fn remove(store: &ServiceStore, name: &str) -> Result<()> {
    let name = ensure_localhost_suffix(name);
    store.remove_by_name(&name)?;
    println!("Removed {name}");
    Ok(())
}
