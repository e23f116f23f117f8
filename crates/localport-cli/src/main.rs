//! localport - manage local service DNS names.
//!
//! Thin command surface over the store, blacklist, naming-rule, and CA
//! libraries. Every failure prints one line prefixed by the operation and
//! exits non-zero.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
