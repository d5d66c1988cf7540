//! Position model: the open-position projection derived from buy/sell fills.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Setup;

/// An open long position in one ticker.
///
/// Invariants enforced by the constructor and every mutation:
/// - `shares >= 1` while the position exists (zero shares means closed)
/// - `cost_basis` moves only on buys, via quantity-weighted averaging
/// - `stop_price` never decreases for the lifetime of the position
/// - `high_water_mark` starts at the entry price and only moves up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Ticker symbol
    pub ticker: String,

    /// Whole shares held
    pub shares: i64,

    /// Quantity-weighted average entry price
    pub cost_basis: Decimal,

    /// Current protective stop; only ever raised
    pub stop_price: Decimal,

    /// Highest price observed since the position opened
    pub high_water_mark: Decimal,

    /// Setup that triggered the entry
    pub setup: Setup,

    /// When the first buy fill was applied
    pub opened_at: DateTime<Utc>,
}

/// One realized-PnL record, booked when a sell fill is applied
/// against the position's cost basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedTrade {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub realized_pnl: Decimal,
}

/// Result of applying a sell fill.
#[derive(Debug, Clone)]
pub struct SellOutcome {
    /// The realized-PnL record for the shares actually sold
    pub realized: RealizedTrade,

    /// Shares actually sold (may be less than requested on an over-sell)
    pub sold: i64,

    /// True when the sell requested more shares than were held
    pub clamped: bool,

    /// True when the position reached zero shares and is now closed
    pub closed: bool,
}

impl Position {
    /// Open a new position from its first buy fill.
    pub fn open(
        ticker: String,
        shares: i64,
        price: Decimal,
        initial_stop: Decimal,
        setup: Setup,
        opened_at: DateTime<Utc>,
    ) -> Result<Self> {
        if shares < 1 {
            bail!("position {} opened with {} shares", ticker, shares);
        }
        if price <= Decimal::ZERO {
            bail!("position {} opened at non-positive price {}", ticker, price);
        }
        Ok(Self {
            ticker,
            shares,
            cost_basis: price,
            stop_price: initial_stop,
            high_water_mark: price,
            setup,
            opened_at,
        })
    }

    /// Apply an additional buy fill, blending the cost basis:
    /// `(old_shares * old_cost + qty * price) / (old_shares + qty)`.
    pub fn add_shares(&mut self, qty: i64, price: Decimal) -> Result<()> {
        if qty < 1 {
            bail!("buy of {} shares for {}", qty, self.ticker);
        }
        let old = Decimal::from(self.shares);
        let added = Decimal::from(qty);
        self.cost_basis = (old * self.cost_basis + added * price) / (old + added);
        self.shares += qty;
        Ok(())
    }

    /// Apply a sell fill. Selling more shares than held is an accounting
    /// anomaly: shares clamp at zero and PnL is booked only for the
    /// shares that were actually available. Cost basis is untouched.
    pub fn sell_shares(&mut self, qty: i64, price: Decimal, timestamp: DateTime<Utc>) -> SellOutcome {
        let sold = qty.min(self.shares);
        let clamped = qty > self.shares;
        self.shares -= sold;

        SellOutcome {
            realized: RealizedTrade {
                ticker: self.ticker.clone(),
                timestamp,
                realized_pnl: (price - self.cost_basis) * Decimal::from(sold),
            },
            sold,
            clamped,
            closed: self.shares == 0,
        }
    }

    /// Record a new observed price, advancing the high-water mark.
    pub fn observe_price(&mut self, price: Decimal) {
        if price > self.high_water_mark {
            self.high_water_mark = price;
        }
    }

    /// Raise the stop to `candidate` if it is higher than the current
    /// stop. Returns true when the stop actually moved.
    pub fn raise_stop(&mut self, candidate: Decimal) -> bool {
        if candidate > self.stop_price {
            self.stop_price = candidate;
            true
        } else {
            false
        }
    }

    /// Mark-to-market value at the given price.
    pub fn market_value(&self, current_price: Decimal) -> Decimal {
        current_price * Decimal::from(self.shares)
    }

    /// Unrealized PnL at the given price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        (current_price - self.cost_basis) * Decimal::from(self.shares)
    }
}
