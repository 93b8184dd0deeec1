use anyhow::Context;
use botfleet::cli::{fleet, Cli, Commands, RunArgs};
use botfleet::config::AppConfig;
use botfleet::coordinator::{start_fleet, FleetBootstrapConfig};
use clap::Parser;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = cli.output_mode();
    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;

    match cli.command {
        Commands::Run(args) => {
            init_logging(&config.logging);
            run_fleet(args, &config).await?;
        }
        Commands::Control(args) => {
            init_logging_simple();
            args.run(&config).await?;
        }
        Commands::Status => {
            init_logging_simple();
            fleet::show_status(&config, mode).await?;
        }
        Commands::Allocation => {
            init_logging_simple();
            fleet::show_allocation(&config, mode).await?;
        }
        Commands::Audit(args) => {
            init_logging_simple();
            args.run(&config, mode)?;
        }
        Commands::Metrics => {
            init_logging_simple();
            fleet::show_metrics(&config).await?;
        }
        Commands::Check => {
            init_logging_simple();
            fleet::check(&config).await?;
        }
    }

    Ok(())
}

async fn run_fleet(args: RunArgs, config: &AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }

    let mut bootstrap = FleetBootstrapConfig::from(config);
    bootstrap.autostart &= !args.no_autostart;
    bootstrap.watcher &= !args.no_watcher;
    if let Some(balance) = args.balance {
        bootstrap.paper_balance = balance;
    }

    start_fleet(bootstrap, config).await?;
    Ok(())
}
