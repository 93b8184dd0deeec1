use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fleet: FleetSettings,
    pub watcher: WatcherConfig,
    pub safety: SafetyConfig,
    pub audit: AuditConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    /// TOML file holding per-worker configuration (the configuration store)
    pub workers_path: PathBuf,
    /// Root directory for runtime data
    pub data_dir: PathBuf,
    /// Start every enabled worker on boot
    pub autostart: bool,
    /// Maximum time to wait for a worker loop to exit on stop (ms)
    pub stop_timeout_ms: u64,
    /// Starting balance for the paper exchange used in dry-run mode
    pub paper_balance: Decimal,
}

impl FleetSettings {
    /// Prometheus text file refreshed by a running fleet
    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join("metrics.prom")
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            workers_path: PathBuf::from("config/bots.toml"),
            data_dir: PathBuf::from("data"),
            autostart: true,
            stop_timeout_ms: 5_000,
            paper_balance: dec!(1000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub enabled: bool,
    /// Shared control record location
    pub control_path: PathBuf,
    /// Interval between polls of the control record (ms)
    pub poll_interval_ms: u64,
    /// Identical (action, target) commands inside this window are coalesced (ms)
    pub debounce_window_ms: u64,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            control_path: PathBuf::from("data/bot_status.json"),
            poll_interval_ms: 1_000,
            debounce_window_ms: 5_000,
        }
    }
}

/// Fleet-wide kill-switch thresholds and validator limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Daily loss (absolute currency amount) that trips the kill switch
    pub max_daily_loss: Decimal,
    /// Peak-to-current balance drawdown (percent) that trips the kill switch
    pub max_drawdown_pct: Decimal,
    /// Per-sample price move (percent) above which a tick is rejected
    pub max_price_deviation_pct: Decimal,
    /// Smallest order accepted (quote currency)
    pub min_order_usd: Decimal,
    /// Orders above this are clamped down (quote currency)
    pub max_order_usd: Decimal,
    /// Orders above this share of the balance are clamped down (percent)
    pub max_order_pct_balance: Decimal,
    pub max_trades_per_minute: u32,
    pub max_trades_per_hour: u32,
    /// Operators allowed to clear an emergency stop. Empty allows anyone.
    pub privileged_operators: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: dec!(500),
            max_drawdown_pct: dec!(25),
            max_price_deviation_pct: dec!(5),
            min_order_usd: dec!(10),
            max_order_usd: dec!(100),
            max_order_pct_balance: dec!(10),
            max_trades_per_minute: 3,
            max_trades_per_hour: 30,
            privileged_operators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory for the append-only JSONL journal
    pub dir: PathBuf,
    /// In-memory recent-events capacity
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/audit"),
            capacity: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/fleet_snapshot.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted console logs
    pub json: bool,
    /// Directory for daily-rolling log files
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOTFLEET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BOTFLEET__SAFETY__MAX_DAILY_LOSS, etc.)
            .add_source(
                Environment::with_prefix("BOTFLEET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.watcher.poll_interval_ms == 0 {
            errors.push("watcher.poll_interval_ms must be > 0".to_string());
        }
        if self.safety.max_daily_loss <= Decimal::ZERO {
            errors.push("safety.max_daily_loss must be > 0".to_string());
        }
        if self.safety.max_drawdown_pct <= Decimal::ZERO
            || self.safety.max_drawdown_pct > Decimal::ONE_HUNDRED
        {
            errors.push("safety.max_drawdown_pct must be in (0, 100]".to_string());
        }
        if self.safety.max_price_deviation_pct <= Decimal::ZERO {
            errors.push("safety.max_price_deviation_pct must be > 0".to_string());
        }
        if self.safety.min_order_usd > self.safety.max_order_usd {
            errors.push("safety.min_order_usd must not exceed safety.max_order_usd".to_string());
        }
        if self.audit.capacity == 0 {
            errors.push("audit.capacity must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Typed configuration for one worker.
///
/// Unknown keys are rejected at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Display name
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Share of fleet capital, maintained by the allocator
    #[serde(default)]
    pub capital_percent: Decimal,
    /// Relative allocation weight (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Decimal>,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Exit when unrealized PnL falls to this percentage (<= 0)
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: Decimal,
    /// Exit when unrealized PnL reaches this percentage (> 0)
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: Decimal,
    pub instruments: Vec<String>,
    /// Seconds between analysis cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_positions() -> u32 {
    5
}

fn default_stop_loss() -> Decimal {
    dec!(-1.0)
}

fn default_take_profit() -> Decimal {
    dec!(1.5)
}

fn default_cycle_interval() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            capital_percent: Decimal::ZERO,
            weight: None,
            max_positions: default_max_positions(),
            stop_loss_pct: default_stop_loss(),
            take_profit_pct: default_take_profit(),
            instruments: vec!["BTC/USDT".to_string()],
            cycle_interval_secs: default_cycle_interval(),
        }
    }
}

impl WorkerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.capital_percent < Decimal::ZERO || self.capital_percent > Decimal::ONE_HUNDRED {
            errors.push(format!(
                "capital_percent must be in [0, 100], got {}",
                self.capital_percent
            ));
        }
        if let Some(weight) = self.weight {
            if weight <= Decimal::ZERO {
                errors.push(format!("weight must be > 0, got {}", weight));
            }
        }
        if self.stop_loss_pct > Decimal::ZERO {
            errors.push(format!("stop_loss_pct must be <= 0, got {}", self.stop_loss_pct));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            errors.push(format!(
                "take_profit_pct must be > 0, got {}",
                self.take_profit_pct
            ));
        }
        if self.instruments.is_empty() {
            errors.push("instruments must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument) {
                errors.push(format!("duplicate instrument {}", instrument));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The full set of configured workers, keyed by worker name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSet {
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerConfig>,
}

impl WorkerSet {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (name, worker) in &self.workers {
            if name.trim().is_empty() || name.eq_ignore_ascii_case("all") {
                errors.push(format!("invalid worker name '{}'", name));
            }
            if let Err(worker_errors) = worker.validate() {
                errors.extend(worker_errors.into_iter().map(|e| format!("{}: {}", name, e)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
