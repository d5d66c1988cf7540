//! Candidate selection: rank the cycle's signals and pick at most
//! `max_entries` tickers to enter.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;

use crate::models::Candidate;

use super::config::{EngineConfig, RiskConfig};

/// An accepted entry, tagged with its computed initial stop.
#[derive(Debug, Clone)]
pub struct EntryPlan {
    pub candidate: Candidate,
    pub initial_stop: Decimal,
}

/// Ranks and filters candidates into an ordered entry list.
///
/// Momentum setups are ranked by relative volume (descending) and take
/// priority over the reversion pool (Panic / TrendReclaim, ranked by RSI
/// ascending): volume surges decay quickly, so when both pools compete
/// for the same capacity slot the momentum name wins.
pub struct CandidateSelector {
    engine: EngineConfig,
    risk: RiskConfig,
}

impl CandidateSelector {
    pub fn new(engine: EngineConfig, risk: RiskConfig) -> Self {
        Self { engine, risk }
    }

    /// Select up to `max_entries` candidates, excluding tickers that are
    /// already open or have a pending buy. An empty result means no
    /// setups qualified this cycle; that is a normal outcome.
    pub fn select(
        &self,
        candidates: &[Candidate],
        open_tickers: &HashSet<String>,
        pending_tickers: &HashSet<String>,
    ) -> Vec<EntryPlan> {
        let mut momentum: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.setup.is_momentum())
            .collect();
        let mut reversion: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.setup.is_reversion())
            .collect();

        momentum.sort_by(|a, b| {
            b.relative_volume
                .partial_cmp(&a.relative_volume)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reversion.sort_by(|a, b| {
            a.rsi
                .partial_cmp(&b.rsi)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen: HashSet<&str> = HashSet::new();
        let mut selected = Vec::new();

        let combined = momentum
            .iter()
            .take(self.engine.per_pool_cap)
            .chain(reversion.iter().take(self.engine.per_pool_cap));

        for candidate in combined {
            if selected.len() >= self.engine.max_entries {
                break;
            }
            if !seen.insert(candidate.ticker.as_str()) {
                continue;
            }
            if open_tickers.contains(&candidate.ticker) {
                debug!(ticker = %candidate.ticker, "Already holding, skipping");
                continue;
            }
            if pending_tickers.contains(&candidate.ticker) {
                debug!(ticker = %candidate.ticker, "Pending buy exists, skipping");
                continue;
            }

            selected.push(EntryPlan {
                initial_stop: candidate.initial_stop(self.risk.k_entry),
                candidate: (*candidate).clone(),
            });
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Setup;
    use rust_decimal_macros::dec;

    fn candidate(ticker: &str, setup: Setup, rsi: f64, rvol: f64) -> Candidate {
        Candidate {
            ticker: ticker.to_string(),
            setup,
            price: dec!(100),
            atr: dec!(2),
            rsi,
            relative_volume: rvol,
        }
    }

    fn selector() -> CandidateSelector {
        CandidateSelector::new(EngineConfig::default(), RiskConfig::default())
    }

    #[test]
    fn test_momentum_ranked_before_reversion() {
        let candidates = vec![
            candidate("DIP1", Setup::Panic, 22.0, 0.9),
            candidate("MOM1", Setup::Momentum, 65.0, 3.1),
            candidate("MOM2", Setup::Momentum, 60.0, 1.8),
            candidate("DIP2", Setup::TrendReclaim, 28.0, 1.0),
        ];

        let picks = selector().select(&candidates, &HashSet::new(), &HashSet::new());
        let tickers: Vec<&str> = picks.iter().map(|p| p.candidate.ticker.as_str()).collect();

        // Momentum pool first (by RVOL desc), then reversion (by RSI asc)
        assert_eq!(tickers, vec!["MOM1", "MOM2", "DIP1", "DIP2"]);
    }

    #[test]
    fn test_excludes_open_and_pending() {
        let candidates = vec![
            candidate("MOM1", Setup::Momentum, 65.0, 3.1),
            candidate("MOM2", Setup::Momentum, 60.0, 1.8),
            candidate("DIP1", Setup::Panic, 22.0, 0.9),
        ];
        let open: HashSet<String> = ["MOM1".to_string()].into();
        let pending: HashSet<String> = ["DIP1".to_string()].into();

        let picks = selector().select(&candidates, &open, &pending);
        let tickers: Vec<&str> = picks.iter().map(|p| p.candidate.ticker.as_str()).collect();

        assert_eq!(tickers, vec!["MOM2"]);
        for pick in &picks {
            assert!(!open.contains(&pick.candidate.ticker));
            assert!(!pending.contains(&pick.candidate.ticker));
        }
    }

    #[test]
    fn test_capacity_limit() {
        let candidates: Vec<Candidate> = (0..10)
            .map(|i| {
                candidate(
                    &format!("MOM{}", i),
                    Setup::Momentum,
                    60.0,
                    2.0 + i as f64,
                )
            })
            .chain((0..10).map(|i| candidate(&format!("DIP{}", i), Setup::Panic, 20.0 + i as f64, 1.0)))
            .collect();

        let picks = selector().select(&candidates, &HashSet::new(), &HashSet::new());
        assert_eq!(picks.len(), EngineConfig::default().max_entries);
    }

    #[test]
    fn test_duplicate_ticker_keeps_first_occurrence() {
        let candidates = vec![
            candidate("XOM", Setup::Momentum, 58.0, 2.5),
            candidate("XOM", Setup::Panic, 29.0, 1.0),
        ];

        let picks = selector().select(&candidates, &HashSet::new(), &HashSet::new());
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].candidate.setup, Setup::Momentum);
    }

    #[test]
    fn test_no_candidates_is_empty_not_error() {
        let candidates = vec![candidate("SPY", Setup::None, 50.0, 1.0)];
        let picks = selector().select(&candidates, &HashSet::new(), &HashSet::new());
        assert!(picks.is_empty());
    }

    #[test]
    fn test_initial_stop_tagged() {
        let candidates = vec![candidate("NVDA", Setup::Momentum, 65.0, 3.0)];
        let picks = selector().select(&candidates, &HashSet::new(), &HashSet::new());
        // price 100, ATR 2, k_entry 2.0
        assert_eq!(picks[0].initial_stop, dec!(96));
    }
}
