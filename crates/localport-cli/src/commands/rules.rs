//! Naming-rule inspection and the user overlay.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use localport_core::naming::{load_rules_file, RuleEngine};
use localport_storage::atomic::write_atomic;
use localport_storage::paths;

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List the merged rule set
    List,
    /// Print the merged rule set as JSON
    Export,
    /// Install a user rules overlay from a JSON file
    Import { file: PathBuf },
}

pub fn run(command: RulesCommand) -> Result<()> {
    let overlay_path = paths::naming_rules_path();

    match command {
        RulesCommand::List => {
            let engine = RuleEngine::load(&overlay_path)?;
            let rules = engine.rules();

            println!("{:<25} {:<8} {}", "ID", "PRIORITY", "DESCRIPTION");
            println!("{}", "-".repeat(80));
            for rule in &rules {
                println!("{:<25} {:<8} {}", rule.id, rule.priority, rule.description);
            }
            println!(
                "\n{} rules loaded (user overrides: {})",
                rules.len(),
                overlay_path.display()
            );
            Ok(())
        }
        RulesCommand::Export => {
            let engine = RuleEngine::load(&overlay_path)?;
            println!("{}", engine.export_json()?);
            Ok(())
        }
        RulesCommand::Import { file } => {
            // Parse before installing so a broken file never lands.
            load_rules_file(&file)
                .with_context(|| format!("invalid rules file {}", file.display()))?;

            let data = std::fs::read(&file)?;
            write_atomic(&overlay_path, &data, 0o644)?;

            println!("Imported rules to {}", overlay_path.display());
            println!("Rules take effect on next daemon restart.");
            Ok(())
        }
    }
}
