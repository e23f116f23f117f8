//! Notification configuration.

use anyhow::{bail, Result};
use clap::Subcommand;

use localport_core::notify::{EventType, NotifyConfig};
use localport_storage::paths;

#[derive(Debug, Subcommand)]
pub enum NotifyCommand {
    /// Show the notification configuration
    Status,
    /// Enable notifications
    Enable,
    /// Disable notifications
    Disable,
    /// Toggle one event type: localport notify events <type> <on|off>
    Events { event: String, state: String },
}

pub fn run(command: NotifyCommand) -> Result<()> {
    let path = paths::notify_config_path();
    let mut config = NotifyConfig::load(&path)?;

    match command {
        NotifyCommand::Status => {
            println!(
                "Notifications: {}",
                if config.enabled { "enabled" } else { "disabled" }
            );
            println!("Config: {}", path.display());
            println!();
            println!("{:<25} {}", "EVENT", "STATUS");
            println!("{}", "-".repeat(40));
            for event in EventType::all() {
                let enabled = config.event_filter.get(event).copied().unwrap_or(true);
                println!(
                    "{:<25} {}",
                    event.as_str(),
                    if enabled { "on" } else { "off" }
                );
            }
            Ok(())
        }
        NotifyCommand::Enable => {
            config.enabled = true;
            config.save(&path)?;
            println!("Notifications enabled.");
            Ok(())
        }
        NotifyCommand::Disable => {
            config.enabled = false;
            config.save(&path)?;
            println!("Notifications disabled.");
            Ok(())
        }
        NotifyCommand::Events { event, state } => {
            let Some(event) = EventType::parse(&event) else {
                bail!(
                    "unknown event type: {event} (expected one of: {})",
                    EventType::all()
                        .iter()
                        .map(|e| e.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            };
            let enabled = match state.as_str() {
                "on" => true,
                "off" => false,
                other => bail!("expected 'on' or 'off', got: {other}"),
            };

            config.event_filter.insert(event, enabled);
            config.save(&path)?;
            println!("Event {} set to {state}.", event.as_str());
            Ok(())
        }
    }
}
