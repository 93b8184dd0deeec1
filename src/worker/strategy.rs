use rust_decimal::Decimal;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use super::Ticker;
use crate::config::WorkerConfig;
use crate::domain::Position;

/// Entry signal produced by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// Trading heuristics consumed by a worker loop
#[cfg_attr(test, automock)]
pub trait Strategy: Send + Sync {
    fn analyze(&self, market: &Ticker) -> Signal;

    /// `Some(reason)` when the position should be closed
    fn should_sell(&self, position: &Position, market: &Ticker) -> Option<String>;
}

/// Builds the strategy for a worker from its configuration
pub trait StrategyFactory: Send + Sync {
    fn build(&self, worker: &str, config: &WorkerConfig) -> Arc<dyn Strategy>;
}

/// Never enters; exits on the worker's stop-loss or take-profit
#[derive(Debug, Clone)]
pub struct RiskExitStrategy {
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl RiskExitStrategy {
    pub fn new(stop_loss_pct: Decimal, take_profit_pct: Decimal) -> Self {
        Self {
            stop_loss_pct,
            take_profit_pct,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.stop_loss_pct, config.take_profit_pct)
    }
}

impl Strategy for RiskExitStrategy {
    fn analyze(&self, _market: &Ticker) -> Signal {
        Signal::Hold
    }

    fn should_sell(&self, position: &Position, market: &Ticker) -> Option<String> {
        let pnl_pct = position.pnl_pct_at(market.last);
        if pnl_pct <= self.stop_loss_pct {
            Some(format!("stop_loss ({}%)", pnl_pct.round_dp(2)))
        } else if pnl_pct >= self.take_profit_pct {
            Some(format!("take_profit ({}%)", pnl_pct.round_dp(2)))
        } else {
            None
        }
    }
}

/// Factory producing [`RiskExitStrategy`] for every worker
#[derive(Debug, Clone, Default)]
pub struct RiskExitFactory;

impl StrategyFactory for RiskExitFactory {
    fn build(&self, _worker: &str, config: &WorkerConfig) -> Arc<dyn Strategy> {
        Arc::new(RiskExitStrategy::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_exit_thresholds() {
        let strategy = RiskExitStrategy::new(dec!(-1), dec!(1.5));
        let position = Position::open("BTC/USDT", Side::Long, dec!(100), dec!(1));

        assert!(strategy
            .should_sell(&position, &Ticker::new("BTC/USDT", dec!(100.5)))
            .is_none());

        let reason = strategy
            .should_sell(&position, &Ticker::new("BTC/USDT", dec!(99)))
            .unwrap();
        assert!(reason.starts_with("stop_loss"));

        let reason = strategy
            .should_sell(&position, &Ticker::new("BTC/USDT", dec!(101.5)))
            .unwrap();
        assert!(reason.starts_with("take_profit"));

        assert_eq!(strategy.analyze(&Ticker::new("BTC/USDT", dec!(1))), Signal::Hold);
    }
}
