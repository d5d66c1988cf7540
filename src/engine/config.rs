//! Engine configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Risk parameters for stop placement and trailing.
///
/// The two trailing parameters are mode-specific: simulation trails by
/// ATR multiples bar-by-bar, the live loop trails by a percentage of the
/// high-water mark. They are configuration, not constants, because the
/// two modes are not numerically equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// ATR multiple below entry price for the initial stop
    pub k_entry: Decimal,

    /// ATR multiple below the high-water mark for bar-driven trailing
    pub k_trail: Decimal,

    /// Fractional distance below the high-water mark for live trailing
    pub trail_pct: Decimal,

    /// Minimum fractional improvement before replacing a broker-side
    /// stop order (avoids order-replacement churn)
    pub stop_replace_threshold: Decimal,

    /// Fallback stop as a fraction of entry price, used when a signal
    /// stop would sit at or above the market price
    pub fallback_stop_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            k_entry: dec!(2.0),
            k_trail: dec!(2.0),
            trail_pct: dec!(0.05),            // 5% trail in live mode
            stop_replace_threshold: dec!(0.005), // Replace on >0.5% improvement
            fallback_stop_pct: dec!(0.98),    // 2% below entry
        }
    }
}

/// Selection, sizing, and loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum entries accepted per cycle
    pub max_entries: usize,

    /// Candidates taken from each setup pool before merging
    pub per_pool_cap: usize,

    /// Fraction of account cash allocated to one entry
    pub allocation_per_trade: Decimal,

    /// Take-profit leg of the bracket, as a fraction above entry
    pub take_profit_pct: Decimal,

    /// Buying-power floor below which the entry cycle is skipped
    pub min_buying_power: Decimal,

    /// Lookback window for fill reconciliation (hours)
    pub reconcile_lookback_hours: i64,

    /// Sleep between live polling ticks (seconds)
    pub poll_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_entries: 4,
            per_pool_cap: 4,
            allocation_per_trade: dec!(0.10), // 10% per position
            take_profit_pct: dec!(0.10),      // +10% bracket target
            min_buying_power: dec!(500),
            reconcile_lookback_hours: 24,
            poll_interval_secs: 60,
        }
    }
}
