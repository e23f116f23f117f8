//! Blacklist management.

use anyhow::Result;
use clap::Subcommand;

use localport_storage::{paths, BlacklistStore, BlacklistType};

#[derive(Debug, Subcommand)]
pub enum BlacklistCommand {
    /// Blacklist a process id
    Pid { value: String },
    /// Blacklist an executable path or path prefix
    Path { value: String },
    /// Blacklist by regex over the executable path and arguments
    Pattern { value: String },
    /// List all blacklist entries
    List,
    /// Remove a blacklist entry by id
    Remove { id: String },
}

pub fn run(command: BlacklistCommand) -> Result<()> {
    let store = BlacklistStore::open(paths::blacklist_path())?;

    match command {
        BlacklistCommand::Pid { value } => add(&store, BlacklistType::Pid, &value),
        BlacklistCommand::Path { value } => add(&store, BlacklistType::Path, &value),
        BlacklistCommand::Pattern { value } => add(&store, BlacklistType::Pattern, &value),
        BlacklistCommand::List => list(&store),
        BlacklistCommand::Remove { id } => {
            store.remove(&id)?;
            println!("Removed blacklist entry: {id}");
            Ok(())
        }
    }
}

fn add(store: &BlacklistStore, entry_type: BlacklistType, value: &str) -> Result<()> {
    let entry = store.add(entry_type, value)?;
    println!(
        "Added blacklist entry: [{}] {} = {}",
        entry.id, entry.entry_type, entry.value
    );
    println!("The daemon picks this up on its next scan cycle.");
    Ok(())
}

fn list(store: &BlacklistStore) -> Result<()> {
    let entries = store.list();
    if entries.is_empty() {
        println!("No user-defined blacklist entries.");
        println!("(Built-in system blacklist rules are always active.)");
        return Ok(());
    }

    println!("{:<18} {:<10} {:<40} {}", "ID", "TYPE", "VALUE", "CREATED");
    println!("{}", "-".repeat(90));
    for entry in entries {
        println!(
            "{:<18} {:<10} {:<40} {}",
            entry.id,
            entry.entry_type.to_string(),
            entry.value,
            entry.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
