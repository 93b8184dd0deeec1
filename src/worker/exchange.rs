use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::domain::{OrderAck, OrderSide};
use crate::error::{FleetError, Result};

/// Latest market data for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    pub fn new(symbol: &str, last: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            last,
            timestamp: Utc::now(),
        }
    }
}

/// Venue connectivity consumed by worker loops
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Free quote-currency balance
    async fn fetch_balance(&self) -> Result<Decimal>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck>;
}

/// In-memory dry-run venue with a random-walk price per instrument
pub struct PaperExchange {
    balance: Mutex<Decimal>,
    prices: Mutex<HashMap<String, Decimal>>,
    /// Maximum per-fetch move, in percent
    step_pct: f64,
}

impl PaperExchange {
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(balance),
            prices: Mutex::new(HashMap::new()),
            step_pct: 0.5,
        }
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.prices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), price);
        self
    }

    pub fn with_step_pct(mut self, step_pct: f64) -> Self {
        self.step_pct = step_pct.max(0.0);
        self
    }

    fn current_price(&self, symbol: &str) -> Decimal {
        *self
            .prices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(symbol.to_string())
            .or_insert(dec!(100))
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn fetch_balance(&self) -> Result<Decimal> {
        Ok(*self
            .balance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let step = if self.step_pct > 0.0 {
            rand::thread_rng().gen_range(-self.step_pct..=self.step_pct)
        } else {
            0.0
        };
        let factor = Decimal::ONE + Decimal::try_from(step / 100.0).unwrap_or_default();

        let mut prices = self
            .prices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let price = prices.entry(symbol.to_string()).or_insert(dec!(100));
        *price = (*price * factor).round_dp(8);
        Ok(Ticker::new(symbol, *price))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderAck> {
        let price = self.current_price(symbol);
        let notional = price * quantity;

        let mut balance = self
            .balance
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match side {
            OrderSide::Buy => {
                if notional > *balance {
                    return Err(FleetError::Exchange(format!(
                        "insufficient balance: need {}, have {}",
                        notional, *balance
                    )));
                }
                *balance -= notional;
            }
            OrderSide::Sell => *balance += notional,
        }
        debug!(symbol, %side, %quantity, %price, "Paper order filled");

        Ok(OrderAck {
            id: Some(Uuid::new_v4().to_string()),
            symbol: Some(symbol.to_string()),
            status: Some("closed".to_string()),
            filled_qty: Some(quantity),
            average_price: Some(price),
        })
    }
}
