//! Position ledger: the in-memory projection of open positions built by
//! folding buy and sell fills, in order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::models::{FillEvent, FillSide, Position, RealizedTrade, SellOutcome, Setup};

/// Folds fills into open positions. Replaying the same ordered fill
/// stream always reproduces the same shares and cost basis per ticker;
/// stop and high-water state belongs to the risk engine and is re-seeded
/// on recovery.
#[derive(Debug, Default)]
pub struct PositionLedger {
    open: HashMap<String, Position>,
    fallback_stop_pct: Decimal,
}

impl PositionLedger {
    pub fn new(fallback_stop_pct: Decimal) -> Self {
        Self {
            open: HashMap::new(),
            fallback_stop_pct,
        }
    }

    /// Rebuild the ledger from an ordered fill stream (oldest first),
    /// returning it with the realized trades the stream produced. Used
    /// at startup to recover state from the persisted fill log.
    pub fn replay(fallback_stop_pct: Decimal, fills: &[FillEvent]) -> (Self, Vec<RealizedTrade>) {
        let mut ledger = Self::new(fallback_stop_pct);
        let mut realized = Vec::new();
        for fill in fills {
            match fill.side {
                FillSide::Buy => {
                    ledger.apply_buy(
                        &fill.ticker,
                        fill.quantity,
                        fill.price,
                        fill.timestamp,
                        None,
                        Setup::None,
                    );
                }
                FillSide::Sell => {
                    if let Some(outcome) =
                        ledger.apply_sell(&fill.ticker, fill.quantity, fill.price, fill.timestamp)
                    {
                        realized.push(outcome.realized);
                    }
                }
            }
        }
        info!(
            positions = ledger.open.len(),
            realized = realized.len(),
            "Ledger rebuilt from fill log"
        );
        (ledger, realized)
    }

    /// Apply a buy fill. A fill for a held ticker blends into the
    /// existing position; otherwise a new position opens. `initial_stop`
    /// comes from the entry signal; fills recovered without one (replay,
    /// manual fills) get the fallback stop, which the risk engine then
    /// ratchets up from live prices.
    pub fn apply_buy(
        &mut self,
        ticker: &str,
        quantity: i64,
        price: Decimal,
        timestamp: DateTime<Utc>,
        initial_stop: Option<Decimal>,
        setup: Setup,
    ) {
        if quantity < 1 {
            warn!(ticker, quantity, "Ignoring buy fill with no shares");
            return;
        }

        match self.open.get_mut(ticker) {
            Some(position) => {
                // add_shares only fails on qty < 1, checked above
                let _ = position.add_shares(quantity, price);
                info!(
                    ticker,
                    shares = position.shares,
                    cost_basis = %position.cost_basis,
                    "Added to position"
                );
            }
            None => {
                let stop = initial_stop.unwrap_or(price * self.fallback_stop_pct);
                match Position::open(ticker.to_string(), quantity, price, stop, setup, timestamp) {
                    Ok(position) => {
                        info!(ticker, quantity, price = %price, stop = %stop, "Opened position");
                        self.open.insert(ticker.to_string(), position);
                    }
                    Err(e) => warn!(ticker, "Rejected buy fill: {e:#}"),
                }
            }
        }
    }

    /// Apply a sell fill against the held position, booking realized
    /// PnL. Returns `None` when no position exists for the ticker (the
    /// fill is logged and dropped rather than creating a short).
    pub fn apply_sell(
        &mut self,
        ticker: &str,
        quantity: i64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Option<SellOutcome> {
        let position = match self.open.get_mut(ticker) {
            Some(p) => p,
            None => {
                warn!(ticker, quantity, "Sell fill for a ticker we do not hold, ignoring");
                return None;
            }
        };

        let outcome = position.sell_shares(quantity, price, timestamp);
        if outcome.clamped {
            warn!(
                ticker,
                requested = quantity,
                sold = outcome.sold,
                "Over-sell clamped to held shares"
            );
        }
        info!(
            ticker,
            sold = outcome.sold,
            realized = %outcome.realized.realized_pnl,
            "Booked sell fill"
        );
        if outcome.closed {
            self.open.remove(ticker);
            info!(ticker, "Position closed");
        }
        Some(outcome)
    }

    pub fn get(&self, ticker: &str) -> Option<&Position> {
        self.open.get(ticker)
    }

    pub fn get_mut(&mut self, ticker: &str) -> Option<&mut Position> {
        self.open.get_mut(ticker)
    }

    pub fn holds(&self, ticker: &str) -> bool {
        self.open.contains_key(ticker)
    }

    pub fn open_tickers(&self) -> impl Iterator<Item = &str> {
        self.open.keys().map(|k| k.as_str())
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Point-in-time copy of every open position, sorted by ticker so
    /// output is stable.
    pub fn snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.open.values().cloned().collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    fn buy(order_id: &str, ticker: &str, qty: i64, price: Decimal, hour: u32) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            ticker: ticker.to_string(),
            side: FillSide::Buy,
            quantity: qty,
            price,
            timestamp: ts(hour),
        }
    }

    fn sell(order_id: &str, ticker: &str, qty: i64, price: Decimal, hour: u32) -> FillEvent {
        FillEvent {
            side: FillSide::Sell,
            ..buy(order_id, ticker, qty, price, hour)
        }
    }

    #[test]
    fn test_buy_then_sell_flow() {
        let mut ledger = PositionLedger::new(dec!(0.98));
        ledger.apply_buy("NVDA", 10, dec!(100), ts(9), Some(dec!(96)), Setup::Momentum);
        ledger.apply_buy("NVDA", 10, dec!(110), ts(10), None, Setup::None);

        let pos = ledger.get("NVDA").unwrap();
        assert_eq!(pos.shares, 20);
        assert_eq!(pos.cost_basis, dec!(105));
        assert_eq!(pos.stop_price, dec!(96));

        let outcome = ledger.apply_sell("NVDA", 20, dec!(120), ts(11)).unwrap();
        assert_eq!(outcome.realized.realized_pnl, dec!(300));
        assert!(outcome.closed);
        assert!(!ledger.holds("NVDA"));
    }

    #[test]
    fn test_sell_without_position_is_dropped() {
        let mut ledger = PositionLedger::new(dec!(0.98));
        assert!(ledger.apply_sell("GME", 5, dec!(20), ts(9)).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_fallback_stop_on_recovered_buy() {
        let mut ledger = PositionLedger::new(dec!(0.98));
        ledger.apply_buy("AMD", 10, dec!(100), ts(9), None, Setup::None);
        assert_eq!(ledger.get("AMD").unwrap().stop_price, dec!(98.00));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let fills = vec![
            buy("o1", "NVDA", 10, dec!(100), 9),
            buy("o2", "AMD", 5, dec!(80), 10),
            buy("o3", "NVDA", 10, dec!(110), 11),
            sell("o4", "NVDA", 15, dec!(120), 12),
            sell("o5", "AMD", 5, dec!(70), 13),
        ];

        let (a, realized_a) = PositionLedger::replay(dec!(0.98), &fills);
        let (b, realized_b) = PositionLedger::replay(dec!(0.98), &fills);

        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), 1);
        let (pa, pb) = (a.get("NVDA").unwrap(), b.get("NVDA").unwrap());
        assert_eq!(pa.shares, 5);
        assert_eq!(pa.cost_basis, dec!(105));
        assert_eq!(pa.shares, pb.shares);
        assert_eq!(pa.cost_basis, pb.cost_basis);
        assert!(!a.holds("AMD"));

        assert_eq!(realized_a.len(), 2);
        assert_eq!(realized_a[0].realized_pnl, dec!(225));
        assert_eq!(realized_a[1].realized_pnl, dec!(-50));
        assert_eq!(realized_a.len(), realized_b.len());
    }

    #[test]
    fn test_snapshot_sorted_and_detached() {
        let mut ledger = PositionLedger::new(dec!(0.98));
        ledger.apply_buy("TSLA", 2, dec!(200), ts(9), None, Setup::None);
        ledger.apply_buy("AAPL", 3, dec!(150), ts(9), None, Setup::None);

        let snap = ledger.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].ticker, "AAPL");
        assert_eq!(snap[1].ticker, "TSLA");

        // Mutating the ledger afterwards does not touch the snapshot
        ledger.apply_sell("TSLA", 2, dec!(210), ts(10));
        assert_eq!(snap[1].shares, 2);
    }
}
