//! Telegram notifications for fills, stop adjustments, and errors.
//!
//! Notification failures are logged and swallowed: the trading loop
//! never stalls because a message did not go out.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram bot notifier.
pub struct Notifier {
    client: Client,
    token: String,
    chat_id: String,
}

impl Notifier {
    /// Build from environment: `TELEGRAM_BOT_TOKEN` and
    /// `TELEGRAM_CHAT_ID`. Returns `None` when either is missing;
    /// notifications are optional.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .ok()?;

        Some(Self {
            client,
            token,
            chat_id,
        })
    }

    /// Send a message. Errors are logged, never propagated.
    pub async fn send(&self, text: &str) {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Notification sent");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Notification rejected");
            }
            Err(e) => {
                warn!("Failed to send notification: {e}");
            }
        }
    }
}
