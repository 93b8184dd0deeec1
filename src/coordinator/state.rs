//! Fleet status views returned by the coordinator

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Position, WorkerInstance, WorkerStats, WorkerStatus};
use crate::safety::KillSwitchState;

/// Per-worker view for operators and the CLI
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    pub name: String,
    pub display_name: String,
    pub enabled: bool,
    pub status: WorkerStatus,
    pub capital_percent: Decimal,
    pub instruments: Vec<String>,
    pub positions: Vec<Position>,
    pub stats: WorkerStats,
    pub win_rate: Decimal,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&WorkerInstance> for WorkerView {
    fn from(instance: &WorkerInstance) -> Self {
        Self {
            name: instance.name.clone(),
            display_name: if instance.config.name.is_empty() {
                instance.name.clone()
            } else {
                instance.config.name.clone()
            },
            enabled: instance.config.enabled,
            status: instance.status,
            capital_percent: instance.config.capital_percent,
            instruments: instance.config.instruments.clone(),
            positions: instance.positions.values().cloned().collect(),
            stats: instance.stats.clone(),
            win_rate: instance.stats.win_rate(),
            restart_count: instance.restart_count,
            started_at: instance.started_at,
            last_error: instance.last_error.clone(),
        }
    }
}

/// Fleet-wide status aggregated over every worker
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub workers: Vec<WorkerView>,
    pub emergency: bool,
    pub kill_switch: KillSwitchState,
    pub active_workers: usize,
    pub open_positions: usize,
    pub total_trades: u64,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub win_rate: Decimal,
    pub generated_at: DateTime<Utc>,
}

impl FleetStatus {
    pub fn new(workers: Vec<WorkerView>, emergency: bool, kill_switch: KillSwitchState) -> Self {
        let active_workers = workers.iter().filter(|w| w.status.is_running()).count();
        let open_positions = workers.iter().map(|w| w.positions.len()).sum();
        let total_trades: u64 = workers.iter().map(|w| w.stats.total_trades).sum();
        let wins: u64 = workers.iter().map(|w| w.stats.wins).sum();
        let win_rate = if total_trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(wins) / Decimal::from(total_trades) * Decimal::ONE_HUNDRED
        };

        Self {
            active_workers,
            open_positions,
            total_trades,
            total_pnl: workers.iter().map(|w| w.stats.total_pnl).sum(),
            daily_pnl: workers.iter().map(|w| w.stats.daily_pnl).sum(),
            win_rate,
            workers,
            emergency,
            kill_switch,
            generated_at: Utc::now(),
        }
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerView> {
        self.workers.iter().find(|w| w.name == name)
    }
}
