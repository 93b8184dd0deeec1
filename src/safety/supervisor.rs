use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{
    KillSwitch, KillSwitchConfig, KillSwitchStatus, LimitCheck, OrderValidator, PriceValidator,
    TradeFrequencyValidator, TripReason,
};
use crate::audit::{AuditEvent, AuditTrail, EventType, Severity, Source};
use crate::config::SafetyConfig;
use crate::domain::{Issuer, OrderAck, OrderSide, OrderStatus};
use crate::error::{FleetError, Result};

/// Why an order was blocked before reaching the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockReason {
    KillSwitch,
    PriceInvalid,
    OrderSize,
    Frequency,
    PositionLimit,
    InvalidAck,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::KillSwitch => "kill_switch",
            BlockReason::PriceInvalid => "price_invalid",
            BlockReason::OrderSize => "order_size",
            BlockReason::Frequency => "frequency",
            BlockReason::PositionLimit => "position_limit",
            BlockReason::InvalidAck => "invalid_ack",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyStats {
    pub kill_switch: KillSwitchStatus,
    pub blocked_trades: u64,
    pub blocked_reasons: BTreeMap<String, u64>,
    pub recent_trades: usize,
}

/// Fleet-wide safety gate shared by the coordinator and every worker loop.
///
/// All checks are synchronous so no order path can await past them.
pub struct SafetySupervisor {
    config: SafetyConfig,
    kill_switch: KillSwitch,
    price_validator: PriceValidator,
    order_validator: OrderValidator,
    frequency: TradeFrequencyValidator,
    blocked_total: AtomicU64,
    blocked_reasons: Mutex<BTreeMap<BlockReason, u64>>,
    audit: Arc<AuditTrail>,
}

impl SafetySupervisor {
    pub fn new(config: SafetyConfig, audit: Arc<AuditTrail>) -> Self {
        info!(
            max_daily_loss = %config.max_daily_loss,
            max_drawdown_pct = %config.max_drawdown_pct,
            max_price_deviation_pct = %config.max_price_deviation_pct,
            "Safety supervisor armed"
        );
        Self {
            kill_switch: KillSwitch::new(KillSwitchConfig::from(&config)),
            price_validator: PriceValidator::new(config.max_price_deviation_pct),
            order_validator: OrderValidator::new(&config),
            frequency: TradeFrequencyValidator::new(
                config.max_trades_per_minute,
                config.max_trades_per_hour,
            ),
            blocked_total: AtomicU64::new(0),
            blocked_reasons: Mutex::new(BTreeMap::new()),
            config,
            audit,
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn is_tripped(&self) -> bool {
        self.kill_switch.is_tripped()
    }

    /// The single gate every worker calls before every order.
    ///
    /// Returns false when already tripped or when either limit trips now.
    pub fn is_safe_to_trade(&self, balance: Decimal, daily_pnl: Decimal) -> bool {
        if self.kill_switch.is_tripped() {
            return false;
        }
        if self.check_daily_loss(daily_pnl) {
            return false;
        }
        if self.check_drawdown(balance) {
            return false;
        }
        true
    }

    /// Returns true when the daily loss limit is breached
    pub fn check_daily_loss(&self, current_pnl: Decimal) -> bool {
        let check = self.kill_switch.check_daily_loss(current_pnl);
        self.report(&check);
        check.breached()
    }

    /// Returns true when the drawdown limit is breached
    pub fn check_drawdown(&self, balance: Decimal) -> bool {
        let check = self.kill_switch.check_drawdown(balance);
        self.report(&check);
        check.breached()
    }

    fn report(&self, check: &LimitCheck) {
        if let LimitCheck::Tripped(reason) = check {
            self.audit_trip(reason, Source::Coordinator, None);
        }
    }

    fn audit_trip(&self, reason: &TripReason, source: Source, issuer: Option<String>) {
        let status = self.kill_switch.status();
        self.audit.log_event(
            AuditEvent::new(
                EventType::Error,
                Severity::Critical,
                source,
                "fleet",
                "kill_switch_tripped",
            )
            .with_detail("reason", reason.to_string())
            .with_detail("kind", reason.kind())
            .with_detail("daily_pnl", status.daily_pnl.to_string())
            .with_detail("peak_balance", status.peak_balance.to_string())
            .with_issuer(issuer),
        );
    }

    /// Trip the kill switch on behalf of an operator
    pub fn trip(&self, reason: &str, issuer: &Issuer) -> bool {
        let reason = TripReason::Emergency(reason.to_string());
        let tripped = self.kill_switch.trip(reason.clone());
        if tripped {
            self.audit_trip(&reason, issuer.source, issuer.user.clone());
        }
        tripped
    }

    pub fn is_privileged(&self, issuer: &Issuer) -> bool {
        if self.config.privileged_operators.is_empty() {
            return true;
        }
        issuer
            .user
            .as_deref()
            .map_or(false, |user| self.config.privileged_operators.iter().any(|op| op == user))
    }

    /// Re-arm the kill switch. Only privileged operators may do this.
    pub fn clear(&self, issuer: &Issuer) -> Result<Option<TripReason>> {
        if !self.is_privileged(issuer) {
            return Err(FleetError::Unauthorized(format!(
                "{} may not clear the kill switch",
                issuer.user.as_deref().unwrap_or(issuer.source.as_str())
            )));
        }
        let previous = self.kill_switch.clear();
        if let Some(reason) = &previous {
            self.audit.log_event(
                AuditEvent::new(
                    EventType::ConfigChange,
                    Severity::Critical,
                    issuer.source,
                    "fleet",
                    "kill_switch_cleared",
                )
                .with_detail("previous_reason", reason.to_string())
                .with_issuer(issuer.user.clone()),
            );
        }
        Ok(previous)
    }

    /// Record a suppressed order: counts the block and emits a critical event
    pub fn suppress_order(&self, worker: &str, symbol: &str, side: OrderSide) {
        self.record_block(BlockReason::KillSwitch);
        let reason = self
            .kill_switch
            .status()
            .reason
            .unwrap_or_else(|| "kill switch tripped".to_string());
        warn!(worker, symbol, %side, %reason, "Order suppressed by kill switch");
        self.audit.log_event(
            AuditEvent::new(
                EventType::Trade,
                Severity::Critical,
                Source::Bot,
                symbol,
                "order_suppressed",
            )
            .with_detail("worker", worker)
            .with_detail("side", side.as_str())
            .with_detail("reason", reason),
        );
    }

    /// Price sanity check for one sample. Never trips the kill switch.
    pub fn validate_price(&self, symbol: &str, price: Decimal) -> bool {
        let accepted = self.price_validator.validate(symbol, price);
        if !accepted {
            self.record_block(BlockReason::PriceInvalid);
        }
        accepted
    }

    pub fn validate_order_ack(&self, ack: &OrderAck) -> Result<OrderStatus> {
        self.order_validator.validate(ack).map_err(|e| {
            self.record_block(BlockReason::InvalidAck);
            e
        })
    }

    /// Full pre-trade validation. Returns the (possibly clamped) quote amount.
    pub fn validate_trade(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        balance: Decimal,
    ) -> Result<Decimal> {
        if self.kill_switch.is_tripped() {
            self.record_block(BlockReason::KillSwitch);
            let reason = self.kill_switch.status().reason.unwrap_or_default();
            return Err(FleetError::SafetyTripped(reason));
        }

        if !self.price_validator.validate(symbol, price) {
            self.record_block(BlockReason::PriceInvalid);
            return Err(FleetError::ValidationRejected(format!(
                "suspicious price {} for {}",
                price, symbol
            )));
        }

        let adjusted = self
            .order_validator
            .validate_size(amount, balance)
            .map_err(|e| {
                self.record_block(BlockReason::OrderSize);
                e
            })?;

        self.frequency.check().map_err(|e| {
            self.record_block(BlockReason::Frequency);
            e
        })?;

        Ok(adjusted)
    }

    pub fn record_executed_trade(&self) {
        self.frequency.record();
    }

    pub fn record_block(&self, reason: BlockReason) {
        self.blocked_total.fetch_add(1, Ordering::SeqCst);
        *self
            .blocked_reasons
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(reason)
            .or_insert(0) += 1;
    }

    /// Add realized PnL to the fleet daily figure, checking the loss limit
    pub fn record_pnl(&self, delta: Decimal) -> Decimal {
        let daily = self.kill_switch.add_pnl(delta);
        self.check_daily_loss(daily);
        daily
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.kill_switch.daily_pnl()
    }

    pub fn reset_daily(&self) {
        self.kill_switch.reset_daily();
        info!("Fleet daily PnL reset");
    }

    pub fn stats(&self) -> SafetyStats {
        let blocked_reasons = self
            .blocked_reasons
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(reason, count)| (reason.as_str().to_string(), *count))
            .collect();
        SafetyStats {
            kill_switch: self.kill_switch.status(),
            blocked_trades: self.blocked_total.load(Ordering::SeqCst),
            blocked_reasons,
            recent_trades: self.frequency.recent_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EventFilter;
    use rust_decimal_macros::dec;

    fn supervisor(config: SafetyConfig) -> (SafetySupervisor, Arc<AuditTrail>) {
        let audit = Arc::new(AuditTrail::in_memory(100));
        (SafetySupervisor::new(config, audit.clone()), audit)
    }

    #[test]
    fn test_daily_loss_trips_and_blocks() {
        let (safety, audit) = supervisor(SafetyConfig {
            max_daily_loss: dec!(500),
            ..Default::default()
        });

        assert!(safety.check_daily_loss(dec!(-501)));
        assert!(safety.is_tripped());
        assert!(!safety.is_safe_to_trade(dec!(10000), dec!(0)));

        let critical = audit.get_recent_events(10, &EventFilter::severity(Severity::Critical));
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].action, "kill_switch_tripped");

        safety.clear(&Issuer::user("ops")).unwrap();
        assert!(safety.is_safe_to_trade(dec!(10000), dec!(0)));
    }

    #[test]
    fn test_price_spike_does_not_trip() {
        let (safety, _) = supervisor(SafetyConfig::default());
        assert!(safety.validate_price("BTC/USDT", dec!(100)));
        assert!(!safety.validate_price("BTC/USDT", dec!(106)));
        assert!(!safety.is_tripped());
        assert_eq!(safety.stats().blocked_reasons["price_invalid"], 1);
    }

    #[test]
    fn test_only_privileged_operators_clear() {
        let (safety, _) = supervisor(SafetyConfig {
            privileged_operators: vec!["admin".into()],
            ..Default::default()
        });
        safety.trip("manual", &Issuer::user("someone"));

        let err = safety.clear(&Issuer::user("someone")).unwrap_err();
        assert!(matches!(err, FleetError::Unauthorized(_)));
        assert!(safety.is_tripped());

        assert!(safety.clear(&Issuer::user("admin")).unwrap().is_some());
        assert!(!safety.is_tripped());
    }

    #[test]
    fn test_validate_trade_order_of_checks() {
        let (safety, _) = supervisor(SafetyConfig::default());

        let adjusted = safety
            .validate_trade("ETH/USDT", dec!(500), dec!(2000), dec!(10000))
            .unwrap();
        assert_eq!(adjusted, dec!(100));

        assert!(matches!(
            safety.validate_trade("ETH/USDT", dec!(5), dec!(2000), dec!(10000)),
            Err(FleetError::ValidationRejected(_))
        ));

        safety.trip("halt", &Issuer::coordinator());
        assert!(matches!(
            safety.validate_trade("ETH/USDT", dec!(50), dec!(2000), dec!(10000)),
            Err(FleetError::SafetyTripped(_))
        ));

        let stats = safety.stats();
        assert_eq!(stats.blocked_trades, 2);
        assert_eq!(stats.blocked_reasons["order_size"], 1);
        assert_eq!(stats.blocked_reasons["kill_switch"], 1);
    }

    #[test]
    fn test_frequency_limit() {
        let (safety, _) = supervisor(SafetyConfig {
            max_trades_per_minute: 2,
            ..Default::default()
        });
        for _ in 0..2 {
            safety
                .validate_trade("BTC/USDT", dec!(50), dec!(100), dec!(10000))
                .unwrap();
            safety.record_executed_trade();
        }
        assert!(safety
            .validate_trade("BTC/USDT", dec!(50), dec!(100), dec!(10000))
            .is_err());
        assert_eq!(safety.stats().blocked_reasons["frequency"], 1);
    }

    #[test]
    fn test_suppressed_order_is_audited() {
        let (safety, audit) = supervisor(SafetyConfig::default());
        safety.trip("halt", &Issuer::coordinator());
        safety.suppress_order("bot_a", "BTC/USDT", OrderSide::Buy);

        let events = audit.get_recent_events(1, &EventFilter::default());
        assert_eq!(events[0].action, "order_suppressed");
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[test]
    fn test_record_pnl_trips_on_cumulative_loss() {
        let (safety, _) = supervisor(SafetyConfig {
            max_daily_loss: dec!(100),
            ..Default::default()
        });
        safety.record_pnl(dec!(-60));
        assert!(!safety.is_tripped());
        safety.record_pnl(dec!(-40));
        assert!(safety.is_tripped());
        assert_eq!(safety.daily_pnl(), dec!(-100));
    }
}
