//! Fleet-wide kill switch.
//!
//! State machine: Armed -> Tripped -> Armed, where the last transition only
//! happens through an explicit [`KillSwitch::clear`]. Trips come from:
//! - **DailyLoss**: realized daily PnL at or beyond `-max_daily_loss`
//! - **Drawdown**: balance dropped `max_drawdown_pct` below the observed peak
//! - **Emergency**: operator-initiated fleet stop

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::config::SafetyConfig;

#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    /// Absolute currency loss that trips the switch
    pub max_daily_loss: Decimal,
    /// Percentage below peak balance that trips the switch
    pub max_drawdown_pct: Decimal,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        SafetyConfig::default().into()
    }
}

impl From<SafetyConfig> for KillSwitchConfig {
    fn from(config: SafetyConfig) -> Self {
        Self::from(&config)
    }
}

impl From<&SafetyConfig> for KillSwitchConfig {
    fn from(config: &SafetyConfig) -> Self {
        Self {
            max_daily_loss: config.max_daily_loss,
            max_drawdown_pct: config.max_drawdown_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSwitchState {
    Armed,
    Tripped,
}

impl std::fmt::Display for KillSwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchState::Armed => write!(f, "armed"),
            KillSwitchState::Tripped => write!(f, "tripped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    DailyLoss { loss: Decimal, limit: Decimal },
    Drawdown { drawdown_pct: Decimal, limit: Decimal },
    Emergency(String),
}

impl TripReason {
    pub fn kind(&self) -> &'static str {
        match self {
            TripReason::DailyLoss { .. } => "daily_loss",
            TripReason::Drawdown { .. } => "drawdown",
            TripReason::Emergency(_) => "emergency",
        }
    }
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::DailyLoss { loss, limit } => {
                write!(f, "daily loss {} >= limit {}", loss, limit)
            }
            TripReason::Drawdown {
                drawdown_pct,
                limit,
            } => write!(f, "drawdown {}% >= limit {}%", drawdown_pct.round_dp(2), limit),
            TripReason::Emergency(reason) => write!(f, "emergency stop: {}", reason),
        }
    }
}

/// Result of evaluating one limit
#[derive(Debug, Clone, PartialEq)]
pub enum LimitCheck {
    WithinLimits,
    /// This call moved the switch from Armed to Tripped
    Tripped(TripReason),
    /// Limit breached while the switch was already tripped
    StillTripped,
}

impl LimitCheck {
    pub fn breached(&self) -> bool {
        !matches!(self, LimitCheck::WithinLimits)
    }
}

#[derive(Debug)]
struct Tracking {
    daily_pnl: Decimal,
    peak_balance: Decimal,
    last_reset: DateTime<Utc>,
    reason: Option<TripReason>,
    tripped_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the switch
#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchStatus {
    pub state: KillSwitchState,
    pub reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    pub daily_pnl: Decimal,
    pub peak_balance: Decimal,
    pub last_reset: DateTime<Utc>,
    pub total_trips: u64,
}

pub struct KillSwitch {
    config: KillSwitchConfig,
    tripped: AtomicBool,
    tracking: Mutex<Tracking>,
    total_trips: AtomicU64,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Self {
        Self {
            config,
            tripped: AtomicBool::new(false),
            tracking: Mutex::new(Tracking {
                daily_pnl: Decimal::ZERO,
                peak_balance: Decimal::ZERO,
                last_reset: Utc::now(),
                reason: None,
                tripped_at: None,
            }),
            total_trips: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(KillSwitchConfig::default())
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock-free read used on every order path
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> KillSwitchState {
        if self.is_tripped() {
            KillSwitchState::Tripped
        } else {
            KillSwitchState::Armed
        }
    }

    /// Trip the switch. Returns true when this call caused the transition.
    pub fn trip(&self, reason: TripReason) -> bool {
        let mut tracking = self.tracking();
        self.trip_locked(&mut tracking, reason)
    }

    fn trip_locked(&self, tracking: &mut Tracking, reason: TripReason) -> bool {
        if self.tripped.swap(true, Ordering::SeqCst) {
            return false;
        }
        error!(reason = %reason, "KILL SWITCH TRIPPED");
        tracking.reason = Some(reason);
        tracking.tripped_at = Some(Utc::now());
        self.total_trips.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Re-arm the switch. Returns the reason it was tripped, if it was.
    pub fn clear(&self) -> Option<TripReason> {
        let mut tracking = self.tracking();
        if !self.tripped.swap(false, Ordering::SeqCst) {
            return None;
        }
        tracking.tripped_at = None;
        let reason = tracking.reason.take();
        info!("Kill switch cleared - re-armed");
        reason
    }

    pub fn check_daily_loss(&self, current_pnl: Decimal) -> LimitCheck {
        self.check_daily_loss_at(current_pnl, Utc::now())
    }

    fn check_daily_loss_at(&self, current_pnl: Decimal, now: DateTime<Utc>) -> LimitCheck {
        let mut tracking = self.tracking();
        Self::roll_day(&mut tracking, now);
        tracking.daily_pnl = current_pnl;

        if current_pnl < Decimal::ZERO && -current_pnl >= self.config.max_daily_loss {
            let reason = TripReason::DailyLoss {
                loss: -current_pnl,
                limit: self.config.max_daily_loss,
            };
            return self.outcome(&mut tracking, reason);
        }
        LimitCheck::WithinLimits
    }

    pub fn check_drawdown(&self, current_balance: Decimal) -> LimitCheck {
        let mut tracking = self.tracking();
        if current_balance > tracking.peak_balance {
            tracking.peak_balance = current_balance;
        }
        if tracking.peak_balance <= Decimal::ZERO {
            return LimitCheck::WithinLimits;
        }

        let drawdown_pct =
            (tracking.peak_balance - current_balance) / tracking.peak_balance * Decimal::ONE_HUNDRED;
        if drawdown_pct >= self.config.max_drawdown_pct {
            let reason = TripReason::Drawdown {
                drawdown_pct,
                limit: self.config.max_drawdown_pct,
            };
            return self.outcome(&mut tracking, reason);
        }
        LimitCheck::WithinLimits
    }

    fn outcome(&self, tracking: &mut Tracking, reason: TripReason) -> LimitCheck {
        if self.trip_locked(tracking, reason.clone()) {
            LimitCheck::Tripped(reason)
        } else {
            LimitCheck::StillTripped
        }
    }

    /// Reset tracked daily PnL once 24h have passed. Never clears a trip.
    fn roll_day(tracking: &mut Tracking, now: DateTime<Utc>) {
        if now - tracking.last_reset >= Duration::hours(24) {
            tracking.daily_pnl = Decimal::ZERO;
            tracking.last_reset = now;
        }
    }

    /// Accumulate realized PnL into the tracked daily figure and return it
    pub fn add_pnl(&self, delta: Decimal) -> Decimal {
        let mut tracking = self.tracking();
        Self::roll_day(&mut tracking, Utc::now());
        tracking.daily_pnl += delta;
        tracking.daily_pnl
    }

    pub fn daily_pnl(&self) -> Decimal {
        let mut tracking = self.tracking();
        Self::roll_day(&mut tracking, Utc::now());
        tracking.daily_pnl
    }

    /// Seed the peak balance, e.g. with the starting balance
    pub fn set_peak_balance(&self, balance: Decimal) {
        self.tracking().peak_balance = balance;
    }

    pub fn reset_daily(&self) {
        let mut tracking = self.tracking();
        tracking.daily_pnl = Decimal::ZERO;
        tracking.last_reset = Utc::now();
    }

    pub fn status(&self) -> KillSwitchStatus {
        let tracking = self.tracking();
        KillSwitchStatus {
            state: self.state(),
            reason: tracking.reason.as_ref().map(|r| r.to_string()),
            tripped_at: tracking.tripped_at,
            daily_pnl: tracking.daily_pnl,
            peak_balance: tracking.peak_balance,
            last_reset: tracking.last_reset,
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}
