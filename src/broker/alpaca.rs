//! Alpaca-style brokerage REST client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{FillEvent, FillSide};

use super::types::*;
use super::{AccountSnapshot, ExecutionAdapter, StopOrder};

const PAPER_API_BASE: &str = "https://paper-api.alpaca.markets";
const LIVE_API_BASE: &str = "https://api.alpaca.markets";
const DATA_API_BASE: &str = "https://data.alpaca.markets";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for the brokerage trading and market-data APIs.
pub struct AlpacaBroker {
    client: Client,
    trading_base: String,
    data_base: String,
    api_key: String,
    api_secret: String,
}

impl AlpacaBroker {
    /// Build from environment: `ALPACA_KEY`, `ALPACA_SECRET`, and
    /// `ALPACA_PAPER` (defaults to paper trading unless set to "false").
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ALPACA_KEY").context("ALPACA_KEY not set")?;
        let api_secret = std::env::var("ALPACA_SECRET").context("ALPACA_SECRET not set")?;
        let paper = std::env::var("ALPACA_PAPER")
            .map(|v| v != "false")
            .unwrap_or(true);

        let trading_base = if paper { PAPER_API_BASE } else { LIVE_API_BASE };
        info!(paper, "Brokerage client configured");

        Self::with_base_urls(
            trading_base.to_string(),
            DATA_API_BASE.to_string(),
            api_key,
            api_secret,
        )
    }

    /// Create with custom base URLs (for testing).
    pub fn with_base_urls(
        trading_base: String,
        data_base: String,
        api_key: String,
        api_secret: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            trading_base,
            data_base,
            api_key,
            api_secret,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    /// Build the bracket submission body. Legs are good-till-canceled:
    /// a day order would drop the protective stop and target at the
    /// close, leaving overnight holds unprotected.
    fn bracket_request(
        ticker: &str,
        quantity: i64,
        take_profit: Decimal,
        stop_price: Decimal,
    ) -> BracketOrderRequest {
        BracketOrderRequest {
            symbol: ticker.to_string(),
            qty: quantity.to_string(),
            side: "buy".to_string(),
            order_type: "market".to_string(),
            time_in_force: "gtc".to_string(),
            order_class: "bracket".to_string(),
            client_order_id: Uuid::new_v4().to_string(),
            take_profit: TakeProfitLeg {
                limit_price: take_profit.round_dp(2).to_string(),
            },
            stop_loss: StopLossLeg {
                stop_price: stop_price.round_dp(2).to_string(),
            },
        }
    }

    async fn open_orders(&self) -> Result<Vec<OrderResponse>> {
        let url = format!("{}/v2/orders?status=open&limit=500", self.trading_base);
        debug!(url = %url, "Fetching open orders");

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch open orders")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Open orders request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse open orders response")
    }
}

#[async_trait]
impl ExecutionAdapter for AlpacaBroker {
    async fn account(&self) -> Result<AccountSnapshot> {
        let url = format!("{}/v2/account", self.trading_base);
        debug!(url = %url, "Fetching account");

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch account")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Account request failed: {} - {}", status, body);
        }

        let account: AccountResponse = response
            .json()
            .await
            .context("Failed to parse account response")?;

        Ok(AccountSnapshot {
            cash: account.cash,
            buying_power: account.buying_power,
            equity: account.equity,
        })
    }

    async fn latest_price(&self, ticker: &str) -> Result<Option<Decimal>> {
        let url = format!("{}/v2/stocks/{}/trades/latest", self.data_base, ticker);
        debug!(url = %url, "Fetching latest trade");

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch latest trade")?;

        // No trade data for the symbol is a per-ticker gap, not an error
        if response.status() == StatusCode::NOT_FOUND {
            warn!(ticker, "No quote available");
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Latest trade request failed: {} - {}", status, body);
        }

        let latest: LatestTradeResponse = response
            .json()
            .await
            .context("Failed to parse latest trade response")?;

        Ok(Some(latest.trade.price))
    }

    async fn open_tickers(&self) -> Result<Vec<String>> {
        let url = format!("{}/v2/positions", self.trading_base);
        debug!(url = %url, "Fetching positions");

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch positions")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Positions request failed: {} - {}", status, body);
        }

        let positions: Vec<PositionResponse> = response
            .json()
            .await
            .context("Failed to parse positions response")?;

        Ok(positions.into_iter().map(|p| p.symbol).collect())
    }

    async fn pending_buy_tickers(&self) -> Result<Vec<String>> {
        let orders = self.open_orders().await?;
        Ok(orders
            .into_iter()
            .filter(|o| o.side == "buy")
            .map(|o| o.symbol)
            .collect())
    }

    async fn submit_bracket_buy(
        &self,
        ticker: &str,
        quantity: i64,
        take_profit: Decimal,
        stop_price: Decimal,
    ) -> Result<std::result::Result<String, String>> {
        let url = format!("{}/v2/orders", self.trading_base);
        let body = Self::bracket_request(ticker, quantity, take_profit, stop_price);

        info!(ticker, quantity, stop = %stop_price, target = %take_profit, "Submitting bracket buy");

        let response = self
            .client
            .post(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .json(&body)
            .send()
            .await
            .context("Failed to submit bracket order")?;

        let status = response.status();
        if status.is_client_error() {
            // A rejection is a per-candidate outcome the cycle reports,
            // not a loop-stopping failure
            let body = response.text().await.unwrap_or_default();
            warn!(ticker, %status, body = %body, "Bracket order rejected");
            return Ok(Err(format!("{} - {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bracket order request failed: {} - {}", status, body);
        }

        let order: OrderResponse = response
            .json()
            .await
            .context("Failed to parse order response")?;

        Ok(Ok(order.id))
    }

    async fn open_stop_order(&self, ticker: &str) -> Result<Option<StopOrder>> {
        let orders = self.open_orders().await?;
        Ok(orders.into_iter().find_map(|o| {
            if o.symbol == ticker && o.side == "sell" && o.order_type == "stop" {
                o.stop_price.map(|stop_price| StopOrder {
                    order_id: o.id,
                    stop_price,
                })
            } else {
                None
            }
        }))
    }

    async fn replace_stop(&self, order_id: &str, new_stop: Decimal) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.trading_base, order_id);
        let body = ReplaceOrderRequest {
            stop_price: new_stop.round_dp(2).to_string(),
        };

        info!(order_id, stop = %new_stop, "Replacing stop order");

        let response = self
            .client
            .patch(&url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .json(&body)
            .send()
            .await
            .context("Failed to replace stop order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Stop replacement failed: {} - {}", status, body);
        }

        Ok(())
    }

    async fn recent_closed_fills(&self, since: DateTime<Utc>) -> Result<Vec<FillEvent>> {
        let url = format!(
            "{}/v2/orders?status=closed&after={}&limit=500",
            self.trading_base,
            since.to_rfc3339()
        );
        debug!(url = %url, "Fetching closed orders");

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to fetch closed orders")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Closed orders request failed: {} - {}", status, body);
        }

        let orders: Vec<OrderResponse> = response
            .json()
            .await
            .context("Failed to parse closed orders response")?;

        let fills = orders
            .into_iter()
            .filter_map(|o| {
                // Closed covers canceled and expired orders too; only
                // filled orders become fills
                if o.status != "filled" {
                    return None;
                }
                let side = FillSide::parse(&o.side)?;
                let quantity = o.filled_qty?.to_i64()?;
                let price = o.filled_avg_price?;
                let timestamp = o.filled_at?;
                if quantity < 1 {
                    return None;
                }
                Some(FillEvent {
                    order_id: o.id,
                    ticker: o.symbol,
                    side,
                    quantity,
                    price,
                    timestamp,
                })
            })
            .collect();

        Ok(fills)
    }
}
