//! Scriptable in-memory brokerage for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::FillEvent;

use super::{AccountSnapshot, ExecutionAdapter, StopOrder};

/// One submitted bracket order, captured for assertions.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub ticker: String,
    pub quantity: i64,
    pub take_profit: Decimal,
    pub stop_price: Decimal,
}

#[derive(Default)]
struct MockState {
    cash: Decimal,
    buying_power: Decimal,
    equity: Decimal,
    prices: HashMap<String, Decimal>,
    open_tickers: Vec<String>,
    pending_buys: Vec<String>,
    stop_orders: HashMap<String, StopOrder>,
    closed_fills: Vec<FillEvent>,
    reject_tickers: HashMap<String, String>,
    submitted: Vec<SubmittedOrder>,
    replaced_stops: Vec<(String, Decimal)>,
    next_order_id: u64,
}

/// Test double for [`ExecutionAdapter`]. Script the account, quotes,
/// holdings, and closed fills up front; inspect what the engine
/// submitted afterwards.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn new(cash: Decimal, buying_power: Decimal) -> Self {
        let broker = Self::default();
        {
            let mut state = broker.state.lock().unwrap();
            state.cash = cash;
            state.buying_power = buying_power;
            state.equity = cash;
        }
        broker
    }

    pub fn set_price(&self, ticker: &str, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert(ticker.to_string(), price);
    }

    pub fn add_open_ticker(&self, ticker: &str) {
        self.state
            .lock()
            .unwrap()
            .open_tickers
            .push(ticker.to_string());
    }

    pub fn add_pending_buy(&self, ticker: &str) {
        self.state
            .lock()
            .unwrap()
            .pending_buys
            .push(ticker.to_string());
    }

    pub fn set_stop_order(&self, ticker: &str, order_id: &str, stop_price: Decimal) {
        self.state.lock().unwrap().stop_orders.insert(
            ticker.to_string(),
            StopOrder {
                order_id: order_id.to_string(),
                stop_price,
            },
        );
    }

    pub fn push_closed_fill(&self, fill: FillEvent) {
        self.state.lock().unwrap().closed_fills.push(fill);
    }

    pub fn reject_next(&self, ticker: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_tickers
            .insert(ticker.to_string(), reason.to_string());
    }

    pub fn submitted_orders(&self) -> Vec<SubmittedOrder> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn replaced_stops(&self) -> Vec<(String, Decimal)> {
        self.state.lock().unwrap().replaced_stops.clone()
    }
}

#[async_trait]
impl ExecutionAdapter for MockBroker {
    async fn account(&self) -> Result<AccountSnapshot> {
        let state = self.state.lock().unwrap();
        Ok(AccountSnapshot {
            cash: state.cash,
            buying_power: state.buying_power,
            equity: state.equity,
        })
    }

    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>> {
        Ok(self.state.lock().unwrap().prices.get(ticker).copied())
    }

    async fn open_tickers(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().open_tickers.clone())
    }

    async fn pending_buy_tickers(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().pending_buys.clone())
    }

    async fn submit_bracket_buy(
        &self,
        ticker: &str,
        quantity: i64,
        take_profit: Decimal,
        stop_price: Decimal,
    ) -> Result<std::result::Result<String, String>> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.reject_tickers.remove(ticker) {
            return Ok(Err(reason));
        }
        state.submitted.push(SubmittedOrder {
            ticker: ticker.to_string(),
            quantity,
            take_profit,
            stop_price,
        });
        state.pending_buys.push(ticker.to_string());
        state.next_order_id += 1;
        Ok(Ok(format!("mock-{}", state.next_order_id)))
    }

    async fn open_stop_order(&self, ticker: &str) -> Result<Option<StopOrder>> {
        Ok(self.state.lock().unwrap().stop_orders.get(ticker).cloned())
    }

    async fn replace_stop(&self, order_id: &str, new_stop: Decimal) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .replaced_stops
            .push((order_id.to_string(), new_stop));
        for stop in state.stop_orders.values_mut() {
            if stop.order_id == order_id {
                stop.stop_price = new_stop;
            }
        }
        Ok(())
    }

    async fn recent_closed_fills(&self, since: DateTime<Utc>) -> Result<Vec<FillEvent>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .closed_fills
            .iter()
            .filter(|f| f.timestamp >= since)
            .cloned()
            .collect())
    }
}
