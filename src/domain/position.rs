use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// An open position held by one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
}

impl Position {
    pub fn open(instrument: &str, side: Side, entry_price: Decimal, quantity: Decimal) -> Self {
        Self {
            instrument: instrument.to_string(),
            side,
            entry_price,
            quantity,
            entry_time: Utc::now(),
        }
    }

    /// Notional value at entry
    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// PnL if closed at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        match self.side {
            Side::Long => (exit_price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - exit_price) * self.quantity,
        }
    }

    /// PnL at `price` as a percentage of entry notional
    pub fn pnl_pct_at(&self, price: Decimal) -> Decimal {
        let notional = self.notional();
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl_at(price) / notional * Decimal::ONE_HUNDRED
    }
}
