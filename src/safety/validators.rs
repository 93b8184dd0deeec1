use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SafetyConfig;
use crate::domain::{OrderAck, OrderStatus};
use crate::error::{FleetError, Result};

/// Per-instrument price sanity check.
///
/// Rejected samples are dropped; they never trip the kill switch.
pub struct PriceValidator {
    max_deviation_pct: Decimal,
    last_accepted: Mutex<HashMap<String, Decimal>>,
}

impl PriceValidator {
    pub fn new(max_deviation_pct: Decimal) -> Self {
        Self {
            max_deviation_pct,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Accept or reject `price` for `symbol`. Accepted prices become the new
    /// reference; the first observation for a symbol is always accepted.
    pub fn validate(&self, symbol: &str, price: Decimal) -> bool {
        if price <= Decimal::ZERO {
            warn!(symbol, %price, "Rejected non-positive price");
            return false;
        }

        let mut last = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let Some(&reference) = last.get(symbol) else {
            last.insert(symbol.to_string(), price);
            return true;
        };

        let deviation_pct = ((price - reference) / reference * Decimal::ONE_HUNDRED).abs();
        if deviation_pct > self.max_deviation_pct {
            warn!(
                symbol,
                %reference,
                %price,
                deviation_pct = %deviation_pct.round_dp(2),
                "Suspicious price move rejected"
            );
            return false;
        }

        last.insert(symbol.to_string(), price);
        true
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(symbol)
            .copied()
    }
}

/// Structural and sizing checks on orders
#[derive(Debug, Clone)]
pub struct OrderValidator {
    min_order: Decimal,
    max_order: Decimal,
    max_pct_balance: Decimal,
}

impl OrderValidator {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            min_order: config.min_order_usd,
            max_order: config.max_order_usd,
            max_pct_balance: config.max_order_pct_balance,
        }
    }

    /// Gate before trusting an exchange acknowledgment
    pub fn validate(&self, ack: &OrderAck) -> Result<OrderStatus> {
        let Some(raw) = ack.status.as_deref() else {
            return Err(FleetError::ValidationRejected(
                "order acknowledgment has no status".to_string(),
            ));
        };
        match OrderStatus::parse(raw) {
            Some(status) => {
                debug!(id = ?ack.id, %raw, "Order acknowledgment accepted");
                Ok(status)
            }
            None => Err(FleetError::ValidationRejected(format!(
                "unrecognized order status '{}'",
                raw
            ))),
        }
    }

    /// Validate a quote-currency order amount against absolute and
    /// balance-relative limits. Oversized orders are clamped; orders below
    /// the minimum (before or after clamping) are rejected.
    pub fn validate_size(&self, amount: Decimal, balance: Decimal) -> Result<Decimal> {
        if amount < self.min_order {
            return Err(FleetError::ValidationRejected(format!(
                "order too small: {} < {}",
                amount, self.min_order
            )));
        }

        let mut adjusted = amount;
        if adjusted > self.max_order {
            warn!(%amount, max = %self.max_order, "Order clamped to absolute maximum");
            adjusted = self.max_order;
        }

        let max_by_balance = balance * self.max_pct_balance / Decimal::ONE_HUNDRED;
        if adjusted > max_by_balance {
            warn!(%amount, max = %max_by_balance, "Order clamped to balance share");
            adjusted = max_by_balance;
        }

        if adjusted < self.min_order {
            return Err(FleetError::ValidationRejected(format!(
                "insufficient balance for minimum order ({} available at {}%)",
                balance, self.max_pct_balance
            )));
        }
        Ok(adjusted)
    }
}

/// Sliding-window cap on executed trades per minute and per hour
pub struct TradeFrequencyValidator {
    per_minute: u32,
    per_hour: u32,
    executed: Mutex<VecDeque<DateTime<Utc>>>,
}

impl TradeFrequencyValidator {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            executed: Mutex::new(VecDeque::new()),
        }
    }

    pub fn check(&self) -> Result<()> {
        self.check_at(Utc::now())
    }

    pub(crate) fn check_at(&self, now: DateTime<Utc>) -> Result<()> {
        let mut executed = self
            .executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while executed
            .front()
            .map_or(false, |t| now - *t >= Duration::hours(1))
        {
            executed.pop_front();
        }

        let last_minute = executed
            .iter()
            .filter(|t| now - **t < Duration::minutes(1))
            .count();
        if last_minute >= self.per_minute as usize {
            return Err(FleetError::ValidationRejected(format!(
                "limit of {} trades/minute reached",
                self.per_minute
            )));
        }
        if executed.len() >= self.per_hour as usize {
            return Err(FleetError::ValidationRejected(format!(
                "limit of {} trades/hour reached",
                self.per_hour
            )));
        }
        Ok(())
    }

    pub fn record(&self) {
        self.record_at(Utc::now());
    }

    pub(crate) fn record_at(&self, at: DateTime<Utc>) {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(at);
    }

    pub fn recent_count(&self) -> usize {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_first_observation_accepted() {
        let validator = PriceValidator::new(dec!(5));
        assert!(validator.validate("BTC/USDT", dec!(100)));
        assert_eq!(validator.last_price("BTC/USDT"), Some(dec!(100)));
    }

    #[test]
    fn test_price_spike_rejected_and_reference_kept() {
        let validator = PriceValidator::new(dec!(5));
        validator.validate("BTC/USDT", dec!(100));

        assert!(!validator.validate("BTC/USDT", dec!(106)));
        assert_eq!(validator.last_price("BTC/USDT"), Some(dec!(100)));

        assert!(validator.validate("BTC/USDT", dec!(105)));
        assert_eq!(validator.last_price("BTC/USDT"), Some(dec!(105)));
    }

    #[test]
    fn test_price_per_instrument() {
        let validator = PriceValidator::new(dec!(5));
        validator.validate("BTC/USDT", dec!(100));
        assert!(validator.validate("ETH/USDT", dec!(3000)));
        assert!(!validator.validate("ETH/USDT", dec!(0)));
    }

    #[test]
    fn test_order_ack_status() {
        let validator = OrderValidator::new(&SafetyConfig::default());
        let filled = OrderAck {
            id: Some("1".into()),
            status: Some("filled".into()),
            ..Default::default()
        };
        assert_eq!(validator.validate(&filled).unwrap(), OrderStatus::Filled);

        assert!(validator.validate(&OrderAck::default()).is_err());
        let rejected = OrderAck {
            status: Some("rejected".into()),
            ..Default::default()
        };
        assert!(matches!(
            validator.validate(&rejected),
            Err(FleetError::ValidationRejected(_))
        ));
    }

    #[test]
    fn test_order_size_clamps_and_rejects() {
        let validator = OrderValidator::new(&SafetyConfig::default());

        assert!(validator.validate_size(dec!(5), dec!(10000)).is_err());
        assert_eq!(validator.validate_size(dec!(250), dec!(10000)).unwrap(), dec!(100));
        assert_eq!(validator.validate_size(dec!(80), dec!(500)).unwrap(), dec!(50));
        // 10% of 50 is below the minimum
        assert!(validator.validate_size(dec!(20), dec!(50)).is_err());
    }

    #[test]
    fn test_trade_frequency_windows() {
        let validator = TradeFrequencyValidator::new(3, 5);
        let start = Utc::now();

        for i in 0..3 {
            validator.record_at(start + Duration::seconds(i));
        }
        assert!(validator.check_at(start + Duration::seconds(10)).is_err());
        assert!(validator.check_at(start + Duration::seconds(61)).is_ok());

        validator.record_at(start + Duration::minutes(2));
        validator.record_at(start + Duration::minutes(3));
        assert!(validator.check_at(start + Duration::minutes(10)).is_err());
        assert!(validator
            .check_at(start + Duration::minutes(60) + Duration::seconds(5))
            .is_ok());
    }
}
