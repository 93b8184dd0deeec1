//! Offline fleet views
//!
//! botfleet status       - workers, positions and stats from the last snapshot
//! botfleet allocation   - capital split the allocator would apply
//! botfleet check        - validate configuration files
//! botfleet metrics      - metrics file written by a running fleet

use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;

use super::output::{print_items, OutputMode};
use crate::allocator::{allocate, AllocationInput};
use crate::config::{AppConfig, WorkerSet};
use crate::persistence::{
    ConfigStore, ControlChannel, FileConfigStore, FileControlChannel, FileSnapshotStore,
    SnapshotStore,
};

#[derive(Debug, Serialize, Tabled)]
struct WorkerRow {
    name: String,
    enabled: bool,
    #[tabled(rename = "capital %")]
    capital_percent: Decimal,
    positions: usize,
    trades: u64,
    #[tabled(rename = "win %")]
    win_rate: String,
    #[tabled(rename = "total pnl")]
    total_pnl: Decimal,
    #[tabled(rename = "daily pnl")]
    daily_pnl: Decimal,
}

#[derive(Debug, Serialize, Tabled)]
struct AllocationRow {
    name: String,
    enabled: bool,
    weight: String,
    #[tabled(rename = "stored %")]
    stored: Decimal,
    #[tabled(rename = "computed %")]
    computed: Decimal,
}

async fn load_workers(config: &AppConfig) -> Result<WorkerSet> {
    Ok(FileConfigStore::new(&config.fleet.workers_path).load().await?)
}

pub async fn show_status(config: &AppConfig, mode: OutputMode) -> Result<()> {
    let workers = load_workers(config).await?;
    let snapshot = FileSnapshotStore::new(&config.snapshot.path).load().await?;

    let rows: Vec<WorkerRow> = workers
        .workers
        .iter()
        .map(|(name, worker)| {
            let saved = snapshot.as_ref().and_then(|s| s.workers.get(name));
            let stats = saved.map(|s| s.stats.clone()).unwrap_or_default();
            WorkerRow {
                name: name.clone(),
                enabled: worker.enabled,
                capital_percent: worker.capital_percent,
                positions: saved.map_or(0, |s| s.positions.len()),
                trades: stats.total_trades,
                win_rate: format!("{:.1}", stats.win_rate()),
                total_pnl: stats.total_pnl,
                daily_pnl: stats.daily_pnl,
            }
        })
        .collect();
    print_items(&rows, mode)?;

    if mode == OutputMode::Table {
        match &snapshot {
            Some(s) => println!("\nsnapshot taken {}", s.taken_at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("\nno snapshot yet"),
        }
        let channel = FileControlChannel::new(&config.watcher.control_path);
        if let Ok(Some(record)) = channel.read().await {
            if record.emergency_stop {
                println!("\x1b[31m⚠ emergency stop is latched\x1b[0m");
            }
            if let Some(command) = record.command() {
                println!(
                    "last command: {} {} at {}",
                    command.action,
                    command.target,
                    command.issued_at.format("%H:%M:%S")
                );
            }
        }
    }
    Ok(())
}

pub async fn show_allocation(config: &AppConfig, mode: OutputMode) -> Result<()> {
    let workers = load_workers(config).await?;
    let inputs: Vec<AllocationInput> = workers
        .workers
        .iter()
        .map(|(name, worker)| AllocationInput::new(name, worker.enabled, worker.weight))
        .collect();
    let allocation = allocate(&inputs);

    let rows: Vec<AllocationRow> = workers
        .workers
        .iter()
        .map(|(name, worker)| AllocationRow {
            name: name.clone(),
            enabled: worker.enabled,
            weight: worker.weight.map_or_else(|| "1".to_string(), |w| w.to_string()),
            stored: worker.capital_percent,
            computed: allocation.get(name),
        })
        .collect();
    print_items(&rows, mode)?;

    if mode == OutputMode::Table {
        println!("\ntotal {}%", allocation.total());
    }
    Ok(())
}

pub async fn show_metrics(config: &AppConfig) -> Result<()> {
    let path = config.fleet.metrics_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            print!("{}", text);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => anyhow::bail!(
            "no metrics at {} (is `botfleet run` up?)",
            path.display()
        ),
        Err(e) => Err(e.into()),
    }
}

pub async fn check(config: &AppConfig) -> Result<()> {
    let mut problems = Vec::new();
    if let Err(errors) = config.validate() {
        problems.extend(errors);
    }
    match load_workers(config).await {
        Ok(workers) => println!(
            "  {} workers in {}",
            workers.workers.len(),
            config.fleet.workers_path.display()
        ),
        Err(e) => problems.push(e.to_string()),
    }

    if problems.is_empty() {
        println!("\x1b[32m✓ configuration is valid\x1b[0m");
        Ok(())
    } else {
        for problem in &problems {
            println!("\x1b[31m✗ {}\x1b[0m", problem);
        }
        anyhow::bail!("{} configuration problem(s)", problems.len())
    }
}
