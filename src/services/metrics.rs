use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{FleetError, Result};

/// Per-worker control counters
#[derive(Debug, Default)]
struct WorkerCounters {
    restarts: AtomicU64,
    stops: AtomicU64,
    trades: AtomicU64,
}

/// Fleet metrics collector
pub struct FleetMetrics {
    /// Restart attempts
    pub restarts_total: AtomicU64,
    pub restarts_ok: AtomicU64,
    pub restarts_failed: AtomicU64,
    /// Stop attempts
    pub stops_total: AtomicU64,
    pub stops_ok: AtomicU64,
    pub stops_failed: AtomicU64,
    /// Closed trades
    pub trades_total: AtomicU64,
    pub trades_won: AtomicU64,
    pub trades_lost: AtomicU64,
    /// Orders suppressed by the kill switch
    pub orders_suppressed: AtomicU64,
    per_worker: DashMap<String, WorkerCounters>,
    errors: DashMap<String, AtomicU64>,
    realized_pnl: RwLock<Decimal>,
    started_at: DateTime<Utc>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self {
            restarts_total: AtomicU64::new(0),
            restarts_ok: AtomicU64::new(0),
            restarts_failed: AtomicU64::new(0),
            stops_total: AtomicU64::new(0),
            stops_ok: AtomicU64::new(0),
            stops_failed: AtomicU64::new(0),
            trades_total: AtomicU64::new(0),
            trades_won: AtomicU64::new(0),
            trades_lost: AtomicU64::new(0),
            orders_suppressed: AtomicU64::new(0),
            per_worker: DashMap::new(),
            errors: DashMap::new(),
            realized_pnl: RwLock::new(Decimal::ZERO),
            started_at: Utc::now(),
        }
    }

    pub fn record_restart(&self, worker: &str, ok: bool) {
        self.restarts_total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.restarts_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.restarts_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.per_worker
            .entry(worker.to_string())
            .or_default()
            .restarts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self, worker: &str, ok: bool) {
        self.stops_total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.stops_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stops_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.per_worker
            .entry(worker.to_string())
            .or_default()
            .stops
            .fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_trade(&self, worker: &str, pnl: Decimal) {
        self.trades_total.fetch_add(1, Ordering::Relaxed);
        if pnl > Decimal::ZERO {
            self.trades_won.fetch_add(1, Ordering::Relaxed);
        } else {
            self.trades_lost.fetch_add(1, Ordering::Relaxed);
        }
        self.per_worker
            .entry(worker.to_string())
            .or_default()
            .trades
            .fetch_add(1, Ordering::Relaxed);
        *self.realized_pnl.write().await += pnl;
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors
            .entry(error_type.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orders_suppressed(&self) {
        self.orders_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn restarts_for(&self, worker: &str) -> u64 {
        self.per_worker
            .get(worker)
            .map_or(0, |c| c.restarts.load(Ordering::Relaxed))
    }

    pub fn stops_for(&self, worker: &str) -> u64 {
        self.per_worker
            .get(worker)
            .map_or(0, |c| c.stops.load(Ordering::Relaxed))
    }

    pub fn errors_by_type(&self) -> BTreeMap<String, u64> {
        self.errors
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Win rate over closed trades, in percent
    pub fn win_rate(&self) -> f64 {
        let total = self.trades_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.trades_won.load(Ordering::Relaxed) as f64 / total as f64 * 100.0
    }

    pub async fn summary(&self) -> String {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        format!(
            "restarts {}/{} ok | stops {}/{} ok | trades {} (win {:.1}%) | pnl {} | suppressed {} | errors {} | uptime {}m",
            self.restarts_ok.load(Ordering::Relaxed),
            self.restarts_total.load(Ordering::Relaxed),
            self.stops_ok.load(Ordering::Relaxed),
            self.stops_total.load(Ordering::Relaxed),
            self.trades_total.load(Ordering::Relaxed),
            self.win_rate(),
            self.realized_pnl.read().await.round_dp(2),
            self.orders_suppressed.load(Ordering::Relaxed),
            self.errors_by_type().values().sum::<u64>(),
            uptime.num_minutes(),
        )
    }

    /// Export metrics in Prometheus text format
    pub async fn prometheus(&self) -> String {
        let mut out = format!(
            r#"# HELP botfleet_restarts_total Worker restart attempts
# TYPE botfleet_restarts_total counter
botfleet_restarts_total{{result="ok"}} {}
botfleet_restarts_total{{result="failed"}} {}

# HELP botfleet_stops_total Worker stop attempts
# TYPE botfleet_stops_total counter
botfleet_stops_total{{result="ok"}} {}
botfleet_stops_total{{result="failed"}} {}

# HELP botfleet_trades_total Closed trades
# TYPE botfleet_trades_total counter
botfleet_trades_total{{outcome="win"}} {}
botfleet_trades_total{{outcome="loss"}} {}

# HELP botfleet_orders_suppressed_total Orders suppressed by the kill switch
# TYPE botfleet_orders_suppressed_total counter
botfleet_orders_suppressed_total {}

# HELP botfleet_realized_pnl Realized PnL since process start
# TYPE botfleet_realized_pnl gauge
botfleet_realized_pnl {}
"#,
            self.restarts_ok.load(Ordering::Relaxed),
            self.restarts_failed.load(Ordering::Relaxed),
            self.stops_ok.load(Ordering::Relaxed),
            self.stops_failed.load(Ordering::Relaxed),
            self.trades_won.load(Ordering::Relaxed),
            self.trades_lost.load(Ordering::Relaxed),
            self.orders_suppressed.load(Ordering::Relaxed),
            self.realized_pnl.read().await,
        );

        let mut workers: Vec<(String, u64, u64, u64)> = self
            .per_worker
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    e.restarts.load(Ordering::Relaxed),
                    e.stops.load(Ordering::Relaxed),
                    e.trades.load(Ordering::Relaxed),
                )
            })
            .collect();
        workers.sort();
        if !workers.is_empty() {
            out.push_str("\n# HELP botfleet_worker_restarts_total Restarts per worker\n");
            out.push_str("# TYPE botfleet_worker_restarts_total counter\n");
            for (name, restarts, _, _) in &workers {
                let _ = writeln!(out, "botfleet_worker_restarts_total{{worker=\"{}\"}} {}", name, restarts);
            }
            out.push_str("\n# HELP botfleet_worker_stops_total Stops per worker\n");
            out.push_str("# TYPE botfleet_worker_stops_total counter\n");
            for (name, _, stops, _) in &workers {
                let _ = writeln!(out, "botfleet_worker_stops_total{{worker=\"{}\"}} {}", name, stops);
            }
            out.push_str("\n# HELP botfleet_worker_trades_total Closed trades per worker\n");
            out.push_str("# TYPE botfleet_worker_trades_total counter\n");
            for (name, _, _, trades) in &workers {
                let _ = writeln!(out, "botfleet_worker_trades_total{{worker=\"{}\"}} {}", name, trades);
            }
        }

        let errors = self.errors_by_type();
        if !errors.is_empty() {
            out.push_str("\n# HELP botfleet_errors_total Errors by type\n");
            out.push_str("# TYPE botfleet_errors_total counter\n");
            for (kind, count) in errors {
                let _ = writeln!(out, "botfleet_errors_total{{type=\"{}\"}} {}", kind, count);
            }
        }
        out
    }

    /// Replace `path` with the Prometheus text export, for a textfile
    /// collector or `botfleet metrics`
    pub async fn write_prometheus(&self, path: &Path) -> Result<()> {
        let text = self.prometheus().await;
        crate::persistence::write_atomic(path, text.as_bytes())
            .await
            .map_err(|e| FleetError::Persistence(format!("{}: {}", path.display(), e)))
    }

    /// Log periodic status
    pub async fn log_status(&self) {
        info!("{}", self.summary().await);
    }
}

impl Default for FleetMetrics {
    fn default() -> Self {
        Self::new()
    }
}
