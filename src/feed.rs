//! Signal feed: where the cycle's entry candidates come from.
//!
//! Screening itself (indicator computation over market data) runs out of
//! process; the bot consumes its output, a list of scored candidates per
//! scan.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::models::Candidate;

/// Source of entry candidates for a cycle.
#[async_trait]
pub trait SignalFeed: Send + Sync {
    async fn scan(&self) -> Result<Vec<Candidate>>;
}

/// Reads candidates from a JSON file written by the screener. A missing
/// file means no signals this cycle, not a failure; a malformed file is
/// an error, since silently trading without signals would mask it.
pub struct JsonSignalFeed {
    path: PathBuf,
}

impl JsonSignalFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SignalFeed for JsonSignalFeed {
    async fn scan(&self) -> Result<Vec<Candidate>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Signal file not found, no candidates this cycle");
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read signal file {}", self.path.display()))?;

        let candidates: Vec<Candidate> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse signal file {}", self.path.display()))?;

        debug!(count = candidates.len(), "Loaded candidates from signal file");
        Ok(candidates)
    }
}

/// Fixed candidate list for tests.
pub struct StaticFeed {
    candidates: Vec<Candidate>,
}

impl StaticFeed {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl SignalFeed for StaticFeed {
    async fn scan(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Setup;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_missing_file_yields_no_candidates() {
        let feed = JsonSignalFeed::new(PathBuf::from("/nonexistent/signals.json"));
        assert!(feed.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parses_signal_file() {
        let dir = std::env::temp_dir().join("silentswing-feed-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("signals.json");
        std::fs::write(
            &path,
            r#"[{"ticker":"NVDA","setup":"momentum","price":"120.5","atr":"3.2","rsi":62.0,"relative_volume":2.4}]"#,
        )
        .unwrap();

        let feed = JsonSignalFeed::new(path);
        let candidates = feed.scan().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ticker, "NVDA");
        assert_eq!(candidates[0].setup, Setup::Momentum);
        assert_eq!(candidates[0].price, dec!(120.5));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = std::env::temp_dir().join("silentswing-feed-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "not json").unwrap();

        let feed = JsonSignalFeed::new(path);
        assert!(feed.scan().await.is_err());
    }
}
