//! Risk engine: trailing-stop maintenance and exit triggers.

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::Position;

use super::config::RiskConfig;

/// Outcome of the pre-submission stop sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCheck {
    /// The proposed stop sits below the market price and can be used as-is
    Valid(Decimal),
    /// The proposed stop was at or above the market price and was replaced
    /// by the fallback stop; surfaced so callers can log/notify it
    Adjusted { proposed: Decimal, fallback: Decimal },
}

impl StopCheck {
    pub fn stop_price(&self) -> Decimal {
        match *self {
            StopCheck::Valid(stop) => stop,
            StopCheck::Adjusted { fallback, .. } => fallback,
        }
    }
}

/// Maintains high-water marks and stop prices for open positions and
/// decides when an exit fires.
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Bar-driven update (simulation mode): advance the high-water mark
    /// with the bar's close and trail the stop by `k_trail` ATRs below
    /// it. The stop only ever moves up.
    pub fn observe_bar(&self, position: &mut Position, close: Decimal, atr: Decimal) {
        position.observe_price(close);
        let candidate = position.high_water_mark - atr * self.config.k_trail;
        if position.raise_stop(candidate) {
            debug!(
                ticker = %position.ticker,
                stop = %position.stop_price,
                hwm = %position.high_water_mark,
                "Trailing stop raised"
            );
        }
    }

    /// Price-driven update (live mode): trail by a fixed percentage of
    /// the high-water mark.
    pub fn observe_price(&self, position: &mut Position, price: Decimal) {
        position.observe_price(price);
        let candidate = position.high_water_mark * (Decimal::ONE - self.config.trail_pct);
        if position.raise_stop(candidate) {
            debug!(
                ticker = %position.ticker,
                stop = %position.stop_price,
                hwm = %position.high_water_mark,
                "Trailing stop raised"
            );
        }
    }

    /// Simulation exit trigger: the bar's low touched the stop. The fill
    /// is assumed at the stop price itself, the pessimistic convention
    /// (no favorable slippage is modeled).
    pub fn exit_on_bar(&self, position: &Position, bar_low: Decimal) -> Option<Decimal> {
        if bar_low <= position.stop_price {
            Some(position.stop_price)
        } else {
            None
        }
    }

    /// Live mode mirrors the brokerage's own stop order; the local stop
    /// is only pushed out when it beats the working order's stop by more
    /// than the materiality threshold.
    pub fn should_replace_stop(&self, broker_stop: Decimal, computed_stop: Decimal) -> bool {
        computed_stop > broker_stop * (Decimal::ONE + self.config.stop_replace_threshold)
    }

    /// Pre-submission sanity check: brokers reject a stop at or above the
    /// market price, so substitute the fallback stop before submitting.
    pub fn validate_entry_stop(&self, proposed: Decimal, market_price: Decimal) -> StopCheck {
        if proposed < market_price {
            StopCheck::Valid(proposed)
        } else {
            StopCheck::Adjusted {
                proposed,
                fallback: market_price * self.config.fallback_stop_pct,
            }
        }
    }
}
