//! botfleet CLI
//!
//! Commands:
//! - `botfleet run` - Run the fleet in the foreground
//! - `botfleet control` - Issue a lifecycle command to a running fleet
//! - `botfleet status` / `allocation` - Offline views of fleet state
//! - `botfleet audit` - Query the audit journal
//! - `botfleet metrics` - Print the metrics file of a running fleet
//! - `botfleet check` - Validate configuration

pub mod audit;
pub mod control;
pub mod fleet;
pub mod output;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

pub use audit::AuditArgs;
pub use control::ControlArgs;
pub use output::OutputMode;

/// Supervisory control plane for a fleet of trading bots
#[derive(Parser, Debug)]
#[command(name = "botfleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, env = "BOTFLEET_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator, workers and control watcher until Ctrl+C
    Run(RunArgs),

    /// Write a command into the shared control record
    Control(ControlArgs),

    /// Show workers, positions and stats from the last snapshot
    Status,

    /// Show the capital split across enabled workers
    Allocation,

    /// Query the audit journal
    Audit(AuditArgs),

    /// Print the Prometheus metrics last written by `run`
    Metrics,

    /// Validate configuration files
    Check,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Do not start workers at boot
    #[arg(long)]
    pub no_autostart: bool,

    /// Do not poll the control record
    #[arg(long)]
    pub no_watcher: bool,

    /// Starting paper balance, overrides fleet.paper_balance
    #[arg(long)]
    pub balance: Option<Decimal>,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_json_flag(self.json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ControlAction;

    #[test]
    fn test_parse_control_command() {
        let cli = Cli::parse_from([
            "botfleet",
            "control",
            "restart",
            "bot_meme",
            "--by",
            "alice",
        ]);
        match cli.command {
            Commands::Control(args) => {
                assert_eq!(args.action, ControlAction::Restart);
                assert_eq!(args.target.as_deref(), Some("bot_meme"));
                assert_eq!(args.by, "alice");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from(["botfleet", "--json", "run", "--no-watcher", "--balance", "250"]);
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.no_watcher);
                assert!(!args.no_autostart);
                assert_eq!(args.balance, Some(Decimal::from(250)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_metrics_command() {
        let cli = Cli::parse_from(["botfleet", "metrics"]);
        assert!(matches!(cli.command, Commands::Metrics));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
