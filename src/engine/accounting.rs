//! Profit accounting: realized-PnL series, unrealized marks, and the
//! equity curve.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{FillEvent, FillSide, Position, RealizedTrade};

/// One point on the equity curve.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Accumulates realized trades and computes account-level figures.
#[derive(Debug, Default)]
pub struct AccountingEngine {
    realized: Vec<RealizedTrade>,
}

impl AccountingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, trade: RealizedTrade) {
        self.realized.push(trade);
    }

    pub fn realized_trades(&self) -> &[RealizedTrade] {
        &self.realized
    }

    pub fn total_realized(&self) -> Decimal {
        self.realized.iter().map(|t| t.realized_pnl).sum()
    }

    /// Cumulative realized PnL in booking order.
    pub fn realized_series(&self) -> Vec<(DateTime<Utc>, Decimal)> {
        let mut running = Decimal::ZERO;
        self.realized
            .iter()
            .map(|t| {
                running += t.realized_pnl;
                (t.timestamp, running)
            })
            .collect()
    }

    /// Unrealized PnL across open positions, priced from the given map.
    /// Positions with no quoted price are marked at cost (zero PnL)
    /// rather than dropped, so the total stays comparable across calls.
    pub fn unrealized(
        positions: &[Position],
        prices: &HashMap<String, Decimal>,
    ) -> Decimal {
        positions
            .iter()
            .map(|p| match prices.get(&p.ticker) {
                Some(price) => p.unrealized_pnl(*price),
                None => Decimal::ZERO,
            })
            .sum()
    }

    /// Total account equity: cash plus the marked value of every open
    /// position. Unquoted positions are valued at cost basis.
    pub fn equity(
        cash: Decimal,
        positions: &[Position],
        prices: &HashMap<String, Decimal>,
    ) -> Decimal {
        let holdings: Decimal = positions
            .iter()
            .map(|p| {
                let price = prices.get(&p.ticker).copied().unwrap_or(p.cost_basis);
                p.market_value(price)
            })
            .sum();
        cash + holdings
    }

    /// Reconstruct the equity curve from an ordered fill stream: one
    /// point per fill, marking every held ticker at its most recent fill
    /// price. Between fills equity holds constant, matching what a fill
    /// log alone can support.
    pub fn equity_curve_from_fills(fills: &[FillEvent], initial_cash: Decimal) -> Vec<EquityPoint> {
        let mut cash = initial_cash;
        let mut shares: HashMap<String, i64> = HashMap::new();
        let mut last_price: HashMap<String, Decimal> = HashMap::new();
        let mut curve = Vec::with_capacity(fills.len());

        for fill in fills {
            match fill.side {
                FillSide::Buy => {
                    cash -= fill.notional();
                    *shares.entry(fill.ticker.clone()).or_insert(0) += fill.quantity;
                }
                FillSide::Sell => {
                    cash += fill.notional();
                    let held = shares.entry(fill.ticker.clone()).or_insert(0);
                    *held = (*held - fill.quantity).max(0);
                }
            }
            last_price.insert(fill.ticker.clone(), fill.price);

            let holdings: Decimal = shares
                .iter()
                .filter(|(_, qty)| **qty > 0)
                .map(|(ticker, qty)| last_price[ticker] * Decimal::from(*qty))
                .sum();
            curve.push(EquityPoint {
                timestamp: fill.timestamp,
                equity: cash + holdings,
            });
        }

        curve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Setup;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    fn trade(pnl: Decimal, hour: u32) -> RealizedTrade {
        RealizedTrade {
            ticker: "NVDA".to_string(),
            timestamp: ts(hour),
            realized_pnl: pnl,
        }
    }

    fn fill(ticker: &str, side: FillSide, qty: i64, price: Decimal, hour: u32) -> FillEvent {
        FillEvent {
            order_id: format!("{ticker}-{hour}"),
            ticker: ticker.to_string(),
            side,
            quantity: qty,
            price,
            timestamp: ts(hour),
        }
    }

    #[test]
    fn test_realized_series_is_cumulative() {
        let mut acct = AccountingEngine::new();
        acct.record(trade(dec!(100), 9));
        acct.record(trade(dec!(-40), 10));
        acct.record(trade(dec!(25), 11));

        let series = acct.realized_series();
        let values: Vec<Decimal> = series.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![dec!(100), dec!(60), dec!(85)]);
        assert_eq!(acct.total_realized(), dec!(85));
    }

    #[test]
    fn test_equity_marks_positions() {
        let positions = vec![
            Position::open("NVDA".to_string(), 10, dec!(100), dec!(96), Setup::Momentum, ts(9))
                .unwrap(),
            Position::open("AMD".to_string(), 5, dec!(80), dec!(76), Setup::Panic, ts(9)).unwrap(),
        ];
        let prices: HashMap<String, Decimal> =
            [("NVDA".to_string(), dec!(110))].into_iter().collect();

        // NVDA marked at 110, AMD has no quote so it marks at cost (80)
        assert_eq!(
            AccountingEngine::equity(dec!(1000), &positions, &prices),
            dec!(2500)
        );
        assert_eq!(AccountingEngine::unrealized(&positions, &prices), dec!(100));
    }

    #[test]
    fn test_equity_curve_from_fills() {
        let fills = vec![
            fill("NVDA", FillSide::Buy, 10, dec!(100), 9),
            fill("NVDA", FillSide::Sell, 10, dec!(120), 12),
        ];

        let curve = AccountingEngine::equity_curve_from_fills(&fills, dec!(10000));
        // Buy at the market moves nothing; the sell books the +200
        assert_eq!(curve[0].equity, dec!(10000));
        assert_eq!(curve[1].equity, dec!(10200));
    }

    #[test]
    fn test_equity_curve_marks_open_position_at_last_fill() {
        let fills = vec![
            fill("NVDA", FillSide::Buy, 10, dec!(100), 9),
            fill("NVDA", FillSide::Buy, 10, dec!(110), 10),
        ];

        let curve = AccountingEngine::equity_curve_from_fills(&fills, dec!(10000));
        // After the second buy, all 20 shares mark at the 110 fill price:
        // cash 10000 - 1000 - 1100 = 7900, holdings 20 * 110 = 2200
        assert_eq!(curve[1].equity, dec!(10100));
    }
}
