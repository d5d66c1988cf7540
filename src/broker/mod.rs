//! Brokerage integration: the execution seam the engine talks through,
//! the Alpaca-style REST client behind it, and a scriptable mock for
//! tests.

mod alpaca;
mod mock;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::FillEvent;

pub use alpaca::AlpacaBroker;
pub use mock::MockBroker;
pub use types::*;

/// Point-in-time account figures.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
}

/// A working protective stop order on the brokerage side.
#[derive(Debug, Clone)]
pub struct StopOrder {
    pub order_id: String,
    pub stop_price: Decimal,
}

/// Everything the engine needs from a brokerage. Quotes, holdings, and
/// orders go through this seam so the live loop and the tests run the
/// same code paths.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn account(&self) -> Result<AccountSnapshot>;

    /// Latest trade price for a ticker. `Ok(None)` means no quote is
    /// available right now; that is a per-ticker skip, not a failure.
    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>>;

    /// Tickers with an open position at the brokerage.
    async fn open_tickers(&self) -> Result<Vec<String>>;

    /// Tickers with an unfilled buy order working.
    async fn pending_buy_tickers(&self) -> Result<Vec<String>>;

    /// Submit a bracket buy: market entry, take-profit limit, stop loss.
    /// Returns the entry order id, or the rejection text.
    async fn submit_bracket_buy(
        &self,
        ticker: &str,
        quantity: i64,
        take_profit: Decimal,
        stop_price: Decimal,
    ) -> Result<std::result::Result<String, String>>;

    /// The working stop order protecting a position, if any.
    async fn open_stop_order(&self, ticker: &str) -> Result<Option<StopOrder>>;

    /// Replace a working stop order with a new stop price.
    async fn replace_stop(&self, order_id: &str, new_stop: Decimal) -> Result<()>;

    /// Closed (filled) orders since the given time, for reconciliation.
    async fn recent_closed_fills(&self, since: DateTime<Utc>) -> Result<Vec<FillEvent>>;
}
