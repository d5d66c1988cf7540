//! Wire types for the brokerage REST API. Money fields arrive as JSON
//! strings and are decoded straight into `Decimal`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account response from /v2/account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub buying_power: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
}

/// Position response from /v2/positions.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_entry_price: Decimal,
}

/// Order response from /v2/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub status: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_qty: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_avg_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub stop_price: Option<Decimal>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// Latest-trade quote from /v2/stocks/{symbol}/trades/latest.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestTradeResponse {
    pub trade: LatestTrade,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestTrade {
    #[serde(rename = "p")]
    pub price: Decimal,
}

/// Bracket-order submission body for POST /v2/orders.
#[derive(Debug, Clone, Serialize)]
pub struct BracketOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: String,
    pub order_class: String,
    pub client_order_id: String,
    pub take_profit: TakeProfitLeg,
    pub stop_loss: StopLossLeg,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeProfitLeg {
    pub limit_price: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopLossLeg {
    pub stop_price: String,
}

/// Stop-replacement body for PATCH /v2/orders/{id}.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaceOrderRequest {
    pub stop_price: String,
}
