//! CLI command definitions and dispatch.

mod blacklist;
mod notify;
mod rules;
mod services;
mod tls;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use localport_storage::{paths, ServiceStore};

#[derive(Debug, Parser)]
#[command(
    name = "localport",
    version,
    about = "Manage local service DNS names"
)]
pub struct Cli {
    /// Use a custom service store path.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List all registered services
    #[command(visible_alias = "ls")]
    List,

    /// Rename a service
    #[command(visible_alias = "mv")]
    Rename { old: String, new: String },

    /// Toggle whether a service stays listed while inactive
    Keep {
        name: String,
        #[arg(default_value_t = true, action = clap::ArgAction::Set)]
        keep: bool,
    },

    /// Add a manual service entry: localport add <name> [host:]<port>
    Add { name: String, target: String },

    /// Remove a service entry
    #[command(visible_alias = "rm")]
    Remove { name: String },

    /// Manage the discovery blacklist
    Blacklist {
        #[command(subcommand)]
        command: blacklist::BlacklistCommand,
    },

    /// Inspect and override naming rules
    Rules {
        #[command(subcommand)]
        command: rules::RulesCommand,
    },

    /// Configure desktop notifications
    Notify {
        #[command(subcommand)]
        command: notify::NotifyCommand,
    },

    /// Manage the local certificate authority
    Tls {
        #[command(subcommand)]
        command: tls::TlsCommand,
    },

    /// Remove all localport data (CA material and configuration)
    Cleanup,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::List => services::list(&open_store(&self.config)?).context("list"),
            Commands::Rename { old, new } => {
                services::rename(&open_store(&self.config)?, &old, &new).context("rename")
            }
            Commands::Keep { name, keep } => {
                services::keep(&open_store(&self.config)?, &name, keep).context("keep")
            }
            Commands::Add { name, target } => {
                services::add(&open_store(&self.config)?, &name, &target).context("add")
            }
            Commands::Remove { name } => {
                services::remove(&open_store(&self.config)?, &name).context("remove")
            }
            Commands::Blacklist { command } => blacklist::run(command).context("blacklist"),
            Commands::Rules { command } => rules::run(command).context("rules"),
            Commands::Notify { command } => notify::run(command).context("notify"),
            Commands::Tls { command } => tls::run(command).context("tls"),
            Commands::Cleanup => cleanup().context("cleanup"),
        }
    }
}

fn open_store(config: &Option<PathBuf>) -> Result<ServiceStore> {
    let path = config.clone().unwrap_or_else(paths::services_path);
    ServiceStore::open(&path)
        .with_context(|| format!("failed to open service store at {}", path.display()))
}

/// Appends `.localhost` to bare names.
pub(crate) fn ensure_localhost_suffix(name: &str) -> String {
    if name.ends_with(".localhost") {
        name.to_string()
    } else {
        format!("{name}.localhost")
    }
}

fn cleanup() -> Result<()> {
    let ca_store = paths::ca_store_path();
    if ca_store.exists() {
        println!("Removing CA store: {}", ca_store.display());
        std::fs::remove_dir_all(&ca_store)
            .with_context(|| format!("failed to remove {}", ca_store.display()))?;
    }

    let config_dir = paths::config_dir();
    if config_dir.exists() {
        println!("Removing configuration: {}", config_dir.display());
        std::fs::remove_dir_all(&config_dir)
            .with_context(|| format!("failed to remove {}", config_dir.display()))?;
    }

    println!("Cleanup complete. localport data has been removed.");
    println!("If the root CA was installed into the OS trust store, remove it there as well.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_helper_is_idempotent() {
        assert_eq!(ensure_localhost_suffix("api"), "api.localhost");
        assert_eq!(ensure_localhost_suffix("api.localhost"), "api.localhost");
    }

    #[test]
    fn cli_parses_common_invocations() {
        use clap::Parser;
        for argv in [
            vec!["localport", "list"],
            vec!["localport", "rename", "old.localhost", "new"],
            vec!["localport", "keep", "myapp", "false"],
            vec!["localport", "add", "db", "5432"],
            vec!["localport", "add", "db", "192.168.1.5:5432"],
            vec!["localport", "blacklist", "pattern", "^/opt/evil/"],
            vec!["localport", "blacklist", "list"],
            vec!["localport", "rules", "export"],
            vec!["localport", "notify", "events", "service_offline", "off"],
            vec!["localport", "tls", "ensure", "myapp"],
            vec!["localport", "tls", "export", "nginx", "myapp.localhost"],
            vec!["localport", "--config", "/tmp/x.json", "list"],
        ] {
            Cli::try_parse_from(&argv).unwrap_or_else(|e| panic!("{argv:?}: {e}"));
        }
    }
}
