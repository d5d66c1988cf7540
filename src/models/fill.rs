//! Fill model: one executed order leg reported by the brokerage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillSide {
    Buy,
    Sell,
}

impl FillSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillSide::Buy => "BUY",
            FillSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(FillSide::Buy),
            "SELL" => Some(FillSide::Sell),
            _ => None,
        }
    }
}

/// An executed fill. Immutable once recorded; the time-ordered fill
/// history is the durable source of truth for all position state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    /// Brokerage order identifier; the idempotency key for dedup
    pub order_id: String,

    /// Ticker symbol
    pub ticker: String,

    /// Buy or sell
    pub side: FillSide,

    /// Whole shares filled (always >= 1)
    pub quantity: i64,

    /// Average fill price per share
    pub price: Decimal,

    /// When the fill completed
    pub timestamp: DateTime<Utc>,
}

impl FillEvent {
    /// Dollar value of this fill.
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional() {
        let fill = FillEvent {
            order_id: "ord-1".to_string(),
            ticker: "AAPL".to_string(),
            side: FillSide::Buy,
            quantity: 10,
            price: dec!(185.50),
            timestamp: Utc::now(),
        };
        assert_eq!(fill.notional(), dec!(1855.00));
    }

    #[test]
    fn test_side_roundtrip() {
        assert_eq!(FillSide::parse("buy"), Some(FillSide::Buy));
        assert_eq!(FillSide::parse("SELL"), Some(FillSide::Sell));
        assert_eq!(FillSide::parse("short"), None);
        assert_eq!(FillSide::Buy.as_str(), "BUY");
    }
}
