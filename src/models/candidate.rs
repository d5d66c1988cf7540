//! Candidate model: one ticker's signal snapshot for the current cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Setup classification produced by the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setup {
    /// Volume surge with price above trend (time-sensitive).
    Momentum,
    /// Oversold dip, mean-reversion entry.
    Panic,
    /// Price reclaimed its trend line after trading below it.
    TrendReclaim,
    /// No qualifying setup this bar.
    #[default]
    None,
}

impl Setup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Setup::Momentum => "MOMENTUM",
            Setup::Panic => "PANIC",
            Setup::TrendReclaim => "TREND_RECLAIM",
            Setup::None => "NONE",
        }
    }

    /// Momentum entries compete in the volume-ranked pool; everything
    /// else that qualifies is a reversion entry.
    pub fn is_momentum(&self) -> bool {
        matches!(self, Setup::Momentum)
    }

    pub fn is_reversion(&self) -> bool {
        matches!(self, Setup::Panic | Setup::TrendReclaim)
    }
}

/// A tradeable signal observation for one ticker, produced fresh each
/// cycle by the signal feed. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Ticker symbol
    pub ticker: String,

    /// Setup classification for this observation
    pub setup: Setup,

    /// Last traded / closing price
    pub price: Decimal,

    /// Average true range at this observation (precomputed upstream)
    pub atr: Decimal,

    /// RSI at this observation (precomputed upstream)
    pub rsi: f64,

    /// Volume relative to its trailing average (precomputed upstream)
    pub relative_volume: f64,
}

impl Candidate {
    /// Initial protective stop for an entry at this candidate's price.
    pub fn initial_stop(&self, k_entry: Decimal) -> Decimal {
        self.price - self.atr * k_entry
    }
}
