use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Position;
use crate::config::WorkerConfig;

/// Run state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Configured but never started
    Idle,
    /// Trading loop active
    Running,
    /// Trading loop stopped by command
    Stopped,
    /// Trading loop exited on an error
    Error,
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, WorkerStatus::Running)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Stopped => write!(f, "stopped"),
            WorkerStatus::Error => write!(f, "error"),
        }
    }
}

/// Cumulative trading statistics for one worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    /// Record a closed trade
    pub fn record_close(&mut self, pnl: Decimal) {
        self.total_trades += 1;
        self.total_pnl += pnl;
        self.daily_pnl += pnl;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.last_trade_at = Some(Utc::now());
    }

    /// Win rate in percent (0 when no trades)
    pub fn win_rate(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.total_trades) * Decimal::ONE_HUNDRED
    }
}

/// Durable part of a worker: what survives a restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub positions: BTreeMap<String, Position>,
    pub stats: WorkerStats,
}

/// Runtime state for one configured worker.
///
/// Exclusively owned by the coordinator. Replaced wholesale on restart with
/// positions and stats carried over.
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    pub name: String,
    pub config: WorkerConfig,
    /// Open positions keyed by instrument
    pub positions: BTreeMap<String, Position>,
    pub stats: WorkerStats,
    pub status: WorkerStatus,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WorkerInstance {
    pub fn new(name: &str, config: WorkerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            positions: BTreeMap::new(),
            stats: WorkerStats::default(),
            status: WorkerStatus::Idle,
            restart_count: 0,
            started_at: None,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            positions: self.positions.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Replace positions and stats with a previously taken snapshot
    pub fn restore(&mut self, snapshot: WorkerSnapshot) {
        self.positions = snapshot.positions;
        self.stats = snapshot.stats;
    }

    /// Build the replacement instance used on restart: new configuration,
    /// carried-over positions and statistics.
    pub fn successor(&self, config: WorkerConfig) -> Self {
        let mut next = WorkerInstance::new(&self.name, config);
        next.positions = self.positions.clone();
        next.stats = self.stats.clone();
        next.restart_count = self.restart_count + 1;
        next.status = self.status;
        next
    }

    pub fn open_position(&mut self, position: Position) -> Option<Position> {
        self.positions.insert(position.instrument.clone(), position)
    }

    pub fn close_position(&mut self, instrument: &str) -> Option<Position> {
        self.positions.remove(instrument)
    }

    /// Total entry notional of all open positions
    pub fn exposure(&self) -> Decimal {
        self.positions.values().map(Position::notional).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stats_record_close() {
        let mut stats = WorkerStats::default();
        stats.record_close(dec!(10));
        stats.record_close(dec!(-4));
        stats.record_close(dec!(2));

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.total_pnl, dec!(8));
        assert_eq!(stats.daily_pnl, dec!(8));
        assert_eq!(stats.win_rate().round_dp(2), dec!(66.67));
    }

    #[test]
    fn test_successor_carries_positions() {
        let mut instance = WorkerInstance::new("bot_a", WorkerConfig::default());
        instance.open_position(Position::open("BTC/USDT", Side::Long, dec!(100), dec!(1)));
        instance.stats.record_close(dec!(5));
        instance.status = WorkerStatus::Running;

        let mut config = WorkerConfig::default();
        config.take_profit_pct = dec!(3);
        let next = instance.successor(config);

        assert_eq!(next.positions, instance.positions);
        assert_eq!(next.stats, instance.stats);
        assert_eq!(next.restart_count, 1);
        assert_eq!(next.config.take_profit_pct, dec!(3));
    }

    #[test]
    fn test_positions_keyed_by_instrument() {
        let mut instance = WorkerInstance::new("bot_a", WorkerConfig::default());
        instance.open_position(Position::open("BTC/USDT", Side::Long, dec!(100), dec!(1)));
        let replaced =
            instance.open_position(Position::open("BTC/USDT", Side::Long, dec!(110), dec!(1)));

        assert!(replaced.is_some());
        assert_eq!(instance.positions.len(), 1);
        assert_eq!(instance.exposure(), dec!(110));
    }
}
