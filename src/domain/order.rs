use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledged order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Resting on the book
    Open,
    /// Closed by the venue (fully executed)
    Closed,
    /// Fully filled
    Filled,
}

impl OrderStatus {
    /// Parse a raw venue status. Only recognized statuses map to a value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(OrderStatus::Open),
            "closed" => Some(OrderStatus::Closed),
            "filled" => Some(OrderStatus::Filled),
            _ => None,
        }
    }

    /// Whether the order has executed and the fill can be trusted
    pub fn is_executed(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Filled)
    }
}

/// Raw order acknowledgment returned by `ExchangeClient::place_market_order`.
///
/// Fields are optional because venues return partial payloads on errors;
/// `OrderValidator` decides whether an acknowledgment can be trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<String>,
    pub filled_qty: Option<Decimal>,
    pub average_price: Option<Decimal>,
}

impl OrderAck {
    /// Parsed status, if present and recognized
    pub fn parsed_status(&self) -> Option<OrderStatus> {
        self.status.as_deref().and_then(OrderStatus::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(OrderStatus::parse("FILLED"), Some(OrderStatus::Filled));
        assert_eq!(OrderStatus::parse(" open "), Some(OrderStatus::Open));
        assert_eq!(OrderStatus::parse("rejected"), None);
        assert!(OrderStatus::Closed.is_executed());
        assert!(!OrderStatus::Open.is_executed());
    }
}
