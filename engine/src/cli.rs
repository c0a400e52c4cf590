//! CLI interface for Depot
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Depot Plugin Repository Backend
///
/// Discovers versioned plugin sources in a monorepo checkout, builds them
/// through the external toolchain, and publishes verified artifact bundles.
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the repository service in the foreground
    Run,

    /// Run one update cycle and exit
    Cycle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from(["depot", "run"]).unwrap();
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn test_cli_parses_cycle_with_config() {
        let cli = Cli::try_parse_from(["depot", "--config", "/tmp/depot.toml", "cycle"]).unwrap();
        assert!(matches!(cli.command, Command::Cycle));
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/depot.toml")));
    }
}
