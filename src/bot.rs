//! Bot runner: the live polling loop.
//!
//! Each tick:
//! - Reconcile closed fills from the brokerage into the local fill log
//! - Trail stops on open positions from fresh quotes
//! - Select, size, and submit new entries
//! - Record an equity point and persist bot state
//!
//! The durable fill log drives recovery: on startup the ledger and the
//! realized-PnL history are rebuilt by replaying it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::broker::ExecutionAdapter;
use crate::db::Database;
use crate::engine::{
    size_entry, AccountingEngine, CandidateSelector, CycleReport, EngineConfig, EntryOutcome,
    PositionLedger, RiskConfig, RiskEngine, SizingOutcome, SkipReason, StopCheck,
};
use crate::feed::SignalFeed;
use crate::models::{FillEvent, FillSide, Setup};
use crate::notify::Notifier;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Log intended orders instead of submitting them
    pub dry_run: bool,

    /// Database URL
    pub database_url: String,

    /// Selection, sizing, and loop parameters
    pub engine: EngineConfig,

    /// Stop placement and trailing parameters
    pub risk: RiskConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            database_url: "sqlite:silentswing.db?mode=rwc".to_string(),
            engine: EngineConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    db: Database,
    broker: Arc<dyn ExecutionAdapter>,
    feed: Arc<dyn SignalFeed>,
    notifier: Option<Notifier>,
    selector: CandidateSelector,
    risk: RiskEngine,
    ledger: PositionLedger,
    accounting: AccountingEngine,
    fills_applied: i64,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    /// Create a new bot instance.
    pub async fn new(
        config: BotConfig,
        broker: Arc<dyn ExecutionAdapter>,
        feed: Arc<dyn SignalFeed>,
    ) -> Result<Self> {
        let db = Database::new(&config.database_url).await?;
        let selector = CandidateSelector::new(config.engine.clone(), config.risk.clone());
        let risk = RiskEngine::new(config.risk.clone());
        let ledger = PositionLedger::new(config.risk.fallback_stop_pct);

        let notifier = Notifier::from_env();
        if notifier.is_none() {
            info!("Notifier not configured, running without notifications");
        }

        Ok(Self {
            config,
            db,
            broker,
            feed,
            notifier,
            selector,
            risk,
            ledger,
            accounting: AccountingEngine::new(),
            fills_applied: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Rebuild in-memory state from the persisted fill log.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing bot...");

        let fills = self.db.load_all_fills().await?;
        for fill in &fills {
            self.apply_fill(fill);
        }
        self.fills_applied = fills.len() as i64;

        let account = self.broker.account().await?;
        self.db
            .init_bot_state(account.equity.to_f64().unwrap_or(0.0))
            .await?;

        info!(
            fills = fills.len(),
            positions = self.ledger.len(),
            realized = %self.accounting.total_realized(),
            "Bot initialized"
        );

        if let Some(notifier) = &self.notifier {
            notifier.send(&self.session_start_message(account.equity)).await;
        }

        Ok(())
    }

    /// Session-start summary sent when a notifier is configured.
    fn session_start_message(&self, equity: Decimal) -> String {
        format!(
            "Bot online{}: {} open position(s), equity ${:.2}",
            if self.config.dry_run { " (dry run)" } else { "" },
            self.ledger.len(),
            equity
        )
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            poll_interval = self.config.engine.poll_interval_secs,
            "Starting bot run loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.engine.poll_interval_secs));

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.tick().await {
                error!(error = %e, "Error in bot tick");
            }
        }

        self.shutdown().await?;

        Ok(())
    }

    /// Single iteration of the main loop.
    async fn tick(&mut self) -> Result<()> {
        debug!("Bot tick");

        // 1. Pull closed fills into the log and the ledger
        self.reconcile_fills().await?;

        // 2. Trail stops on open positions
        self.manage_stops().await?;

        // 3. Select and submit new entries
        let report = self.entry_cycle().await?;
        if !report.entries.is_empty() {
            info!("Entry cycle: {report}");
        }

        // 4. Record equity and persist bot state
        self.record_equity().await?;

        Ok(())
    }

    /// Fold one fill into the ledger and the realized-PnL history.
    fn apply_fill(&mut self, fill: &FillEvent) {
        match fill.side {
            FillSide::Buy => {
                self.ledger.apply_buy(
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
                    self.ledger
                        .apply_sell(&fill.ticker, fill.quantity, fill.price, fill.timestamp)
                {
                    self.accounting.record(outcome.realized);
                }
            }
        }
    }

    /// Fetch recently closed fills from the brokerage and fold the new
    /// ones in. The fill is persisted before it mutates the ledger, so
    /// a crash between the two replays it on restart instead of losing
    /// it. A fill whose order_id is already logged is dropped silently.
    async fn reconcile_fills(&mut self) -> Result<()> {
        let since = Utc::now() - chrono::Duration::hours(self.config.engine.reconcile_lookback_hours);
        let fills = self
            .broker
            .recent_closed_fills(since)
            .await
            .context("Failed to fetch closed fills")?;

        for fill in fills {
            let is_new = self.db.append_fill(&fill).await?;
            if !is_new {
                debug!(order_id = %fill.order_id, "Fill already recorded, skipping");
                continue;
            }

            info!(
                order_id = %fill.order_id,
                ticker = %fill.ticker,
                side = %fill.side.as_str(),
                quantity = fill.quantity,
                price = %fill.price,
                "New fill"
            );
            self.apply_fill(&fill);
            self.fills_applied += 1;

            if let Some(notifier) = &self.notifier {
                notifier
                    .send(&format!(
                        "{} {} {} @ ${}",
                        fill.side.as_str(),
                        fill.quantity,
                        fill.ticker,
                        fill.price
                    ))
                    .await;
            }
        }

        Ok(())
    }

    /// Refresh quotes on open positions, trail the local stop, and push
    /// the brokerage stop order up when the improvement is material.
    async fn manage_stops(&mut self) -> Result<()> {
        let mut held: Vec<String> = self.ledger.open_tickers().map(|t| t.to_string()).collect();
        held.sort();

        for ticker in held {
            let price = match self.broker.latest_price(&ticker).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    warn!(ticker = %ticker, "No quote, skipping stop update");
                    continue;
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Quote fetch failed, skipping stop update");
                    continue;
                }
            };

            let computed_stop = {
                let position = match self.ledger.get_mut(&ticker) {
                    Some(p) => p,
                    None => continue,
                };
                self.risk.observe_price(position, price);
                position.stop_price
            };

            // The brokerage-side stop order is the one that actually
            // protects the position; ours is only pushed out to it
            match self.broker.open_stop_order(&ticker).await {
                Ok(Some(stop)) => {
                    if self.risk.should_replace_stop(stop.stop_price, computed_stop) {
                        info!(
                            ticker = %ticker,
                            from = %stop.stop_price,
                            to = %computed_stop,
                            "Raising brokerage stop"
                        );
                        if let Err(e) = self.broker.replace_stop(&stop.order_id, computed_stop).await
                        {
                            warn!(ticker = %ticker, error = %e, "Stop replacement failed");
                        }
                    }
                }
                Ok(None) => {
                    warn!(
                        ticker = %ticker,
                        "No working stop order, position has no brokerage-side exit"
                    );
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Stop order lookup failed");
                }
            }
        }

        Ok(())
    }

    /// Scan for candidates, select entries, and submit bracket buys.
    async fn entry_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let account = self.broker.account().await.context("Failed to fetch account")?;
        if account.buying_power < self.config.engine.min_buying_power {
            info!(
                buying_power = %account.buying_power,
                floor = %self.config.engine.min_buying_power,
                "Buying power below floor, skipping entries"
            );
            return Ok(report);
        }

        let candidates = self.feed.scan().await.context("Signal scan failed")?;
        if candidates.is_empty() {
            return Ok(report);
        }

        // Exclude anything held locally or at the brokerage, and
        // anything with an unfilled buy already working
        let mut open: HashSet<String> = self.ledger.open_tickers().map(|t| t.to_string()).collect();
        open.extend(self.broker.open_tickers().await?);
        let pending: HashSet<String> = self.broker.pending_buy_tickers().await?.into_iter().collect();

        for plan in self.selector.select(&candidates, &open, &pending) {
            let ticker = plan.candidate.ticker.clone();

            // Quote again at submission time; the signal price may be
            // stale by minutes
            let price = match self.broker.latest_price(&ticker).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    report.push(ticker, EntryOutcome::Skipped(SkipReason::DataUnavailable));
                    continue;
                }
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "Quote fetch failed");
                    report.push(ticker, EntryOutcome::Skipped(SkipReason::DataUnavailable));
                    continue;
                }
            };

            let quantity = match size_entry(
                account.cash,
                self.config.engine.allocation_per_trade,
                price,
            ) {
                SizingOutcome::Shares(n) => n,
                SizingOutcome::InsufficientFunds => {
                    report.push(ticker, EntryOutcome::Skipped(SkipReason::InsufficientFunds));
                    continue;
                }
            };

            let check = self.risk.validate_entry_stop(plan.initial_stop, price);
            let stop_adjusted = matches!(check, StopCheck::Adjusted { .. });
            if let StopCheck::Adjusted { proposed, fallback } = check {
                warn!(
                    ticker = %ticker,
                    proposed = %proposed,
                    fallback = %fallback,
                    "Signal stop at or above market, using fallback"
                );
                if let Some(notifier) = &self.notifier {
                    notifier
                        .send(&format!(
                            "{ticker}: stop {proposed} invalid at price {price}, using {fallback}"
                        ))
                        .await;
                }
            }
            let stop_price = check.stop_price();
            let take_profit = price * (Decimal::ONE + self.config.engine.take_profit_pct);

            if self.config.dry_run {
                info!(
                    ticker = %ticker,
                    quantity,
                    price = %price,
                    stop = %stop_price,
                    target = %take_profit,
                    "[DRY RUN] Would submit bracket buy"
                );
                report.push(
                    ticker,
                    EntryOutcome::Submitted {
                        order_id: "dry-run".to_string(),
                        quantity,
                        stop_price,
                        stop_adjusted,
                    },
                );
                continue;
            }

            match self
                .broker
                .submit_bracket_buy(&ticker, quantity, take_profit, stop_price)
                .await?
            {
                Ok(order_id) => {
                    report.push(
                        ticker,
                        EntryOutcome::Submitted {
                            order_id,
                            quantity,
                            stop_price,
                            stop_adjusted,
                        },
                    );
                }
                Err(reason) => {
                    report.push(ticker, EntryOutcome::Skipped(SkipReason::OrderRejected(reason)));
                }
            }
        }

        Ok(report)
    }

    /// Record an equity point and persist bot state.
    async fn record_equity(&mut self) -> Result<()> {
        let account = self.broker.account().await?;
        let positions = self.ledger.snapshot();

        let mut prices = std::collections::HashMap::new();
        for position in &positions {
            if let Ok(Some(price)) = self.broker.latest_price(&position.ticker).await {
                prices.insert(position.ticker.clone(), price);
            }
        }

        let unrealized = AccountingEngine::unrealized(&positions, &prices);
        let realized = self.accounting.total_realized();
        let equity = AccountingEngine::equity(account.cash, &positions, &prices);

        self.db
            .record_equity_point(
                equity.to_f64().unwrap_or(0.0),
                unrealized.to_f64().unwrap_or(0.0),
                realized.to_f64().unwrap_or(0.0),
            )
            .await?;

        self.db
            .update_bot_state(
                equity.to_f64().unwrap_or(0.0),
                realized.to_f64().unwrap_or(0.0),
                self.fills_applied,
            )
            .await?;

        Ok(())
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");
        self.db.mark_bot_stopped().await?;
        info!("Bot shutdown complete");
        Ok(())
    }

    /// Open positions, for the status views.
    pub fn positions(&self) -> Vec<crate::models::Position> {
        self.ledger.snapshot()
    }

    pub fn total_realized(&self) -> Decimal {
        self.accounting.total_realized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::feed::StaticFeed;
    use crate::models::Candidate;
    use rust_decimal_macros::dec;

    fn test_config() -> BotConfig {
        BotConfig {
            dry_run: false,
            database_url: "sqlite::memory:".to_string(),
            engine: EngineConfig::default(),
            risk: RiskConfig::default(),
        }
    }

    fn candidate(ticker: &str, price: Decimal) -> Candidate {
        Candidate {
            ticker: ticker.to_string(),
            setup: Setup::Momentum,
            price,
            atr: dec!(2),
            rsi: 62.0,
            relative_volume: 2.5,
        }
    }

    fn fill(order_id: &str, ticker: &str, side: FillSide, qty: i64, price: Decimal) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            ticker: ticker.to_string(),
            side,
            quantity: qty,
            price,
            // Recent enough to land inside the reconciliation lookback
            timestamp: Utc::now() - chrono::Duration::hours(1),
        }
    }

    async fn bot_with(
        broker: Arc<MockBroker>,
        candidates: Vec<Candidate>,
    ) -> Bot {
        let feed = Arc::new(StaticFeed::new(candidates));
        let mut bot = Bot::new(test_config(), broker, feed).await.unwrap();
        bot.initialize().await.unwrap();
        bot
    }

    #[tokio::test]
    async fn test_reconcile_applies_each_fill_once() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.push_closed_fill(fill("ord-1", "NVDA", FillSide::Buy, 10, dec!(100)));

        let mut bot = bot_with(broker.clone(), vec![]).await;

        bot.reconcile_fills().await.unwrap();
        bot.reconcile_fills().await.unwrap();

        let positions = bot.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].shares, 10);
        assert_eq!(bot.fills_applied, 1);
    }

    #[tokio::test]
    async fn test_reconcile_books_sell_pnl() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.push_closed_fill(fill("ord-1", "NVDA", FillSide::Buy, 10, dec!(100)));
        broker.push_closed_fill(fill("ord-2", "NVDA", FillSide::Sell, 10, dec!(110)));

        let mut bot = bot_with(broker.clone(), vec![]).await;
        bot.reconcile_fills().await.unwrap();

        assert!(bot.positions().is_empty());
        assert_eq!(bot.total_realized(), dec!(100));
    }

    #[tokio::test]
    async fn test_entry_cycle_submits_bracket() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.set_price("NVDA", dec!(100));

        let mut bot = bot_with(broker.clone(), vec![candidate("NVDA", dec!(100))]).await;
        let report = bot.entry_cycle().await.unwrap();

        assert_eq!(report.submitted(), 1);
        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 1);
        // 10% of 10_000 at 100 => 10 shares; stop 96, target 110
        assert_eq!(orders[0].quantity, 10);
        assert_eq!(orders[0].stop_price, dec!(96));
        assert_eq!(orders[0].take_profit, dec!(110.00));
    }

    #[tokio::test]
    async fn test_entry_cycle_excludes_held_and_pending() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.set_price("AMD", dec!(80));
        broker.add_open_ticker("NVDA");
        broker.add_pending_buy("TSLA");

        let mut bot = bot_with(
            broker.clone(),
            vec![
                candidate("NVDA", dec!(100)),
                candidate("TSLA", dec!(200)),
                candidate("AMD", dec!(80)),
            ],
        )
        .await;
        bot.entry_cycle().await.unwrap();

        let orders = broker.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].ticker, "AMD");
    }

    #[tokio::test]
    async fn test_entry_cycle_respects_buying_power_floor() {
        let broker = Arc::new(MockBroker::new(dec!(400), dec!(400)));
        broker.set_price("NVDA", dec!(100));

        let mut bot = bot_with(broker.clone(), vec![candidate("NVDA", dec!(100))]).await;
        let report = bot.entry_cycle().await.unwrap();

        assert!(report.entries.is_empty());
        assert!(broker.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_missing_quote_skips_candidate_only() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.set_price("AMD", dec!(80));
        // No quote for NVDA

        let mut bot = bot_with(
            broker.clone(),
            vec![candidate("NVDA", dec!(100)), candidate("AMD", dec!(80))],
        )
        .await;
        let report = bot.entry_cycle().await.unwrap();

        assert_eq!(report.submitted(), 1);
        assert!(report.entries.iter().any(|e| {
            e.ticker == "NVDA"
                && e.outcome == EntryOutcome::Skipped(SkipReason::DataUnavailable)
        }));
    }

    #[tokio::test]
    async fn test_rejected_order_reported_not_fatal() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.set_price("NVDA", dec!(100));
        broker.set_price("AMD", dec!(80));
        broker.reject_next("NVDA", "insufficient day trading buying power");

        let mut bot = bot_with(
            broker.clone(),
            vec![candidate("NVDA", dec!(100)), candidate("AMD", dec!(80))],
        )
        .await;
        let report = bot.entry_cycle().await.unwrap();

        assert_eq!(report.submitted(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(broker.submitted_orders()[0].ticker, "AMD");
    }

    #[tokio::test]
    async fn test_session_start_message_reports_state() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.push_closed_fill(fill("ord-1", "NVDA", FillSide::Buy, 10, dec!(100)));

        let mut bot = bot_with(broker.clone(), vec![]).await;
        bot.reconcile_fills().await.unwrap();

        let msg = bot.session_start_message(dec!(10000));
        assert!(msg.contains("1 open position(s)"));
        assert!(msg.contains("$10000.00"));
        assert!(!msg.contains("dry run"));

        bot.config.dry_run = true;
        assert!(bot.session_start_message(dec!(10000)).contains("dry run"));
    }

    #[tokio::test]
    async fn test_manage_stops_replaces_on_material_improvement() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.push_closed_fill(fill("ord-1", "NVDA", FillSide::Buy, 10, dec!(100)));
        broker.set_stop_order("NVDA", "stop-1", dec!(98));
        broker.set_price("NVDA", dec!(120));

        let mut bot = bot_with(broker.clone(), vec![]).await;
        bot.reconcile_fills().await.unwrap();
        bot.manage_stops().await.unwrap();

        // 5% trail below hwm 120 => 114, well past the 0.5% threshold
        let replaced = broker.replaced_stops();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0], ("stop-1".to_string(), dec!(114.00)));
    }

    #[tokio::test]
    async fn test_manage_stops_holds_within_threshold() {
        let broker = Arc::new(MockBroker::new(dec!(10000), dec!(10000)));
        broker.push_closed_fill(fill("ord-1", "NVDA", FillSide::Buy, 10, dec!(100)));
        // Local stop is the 98 fallback; improving a 97.90 broker stop
        // to 98 is under the 0.5% threshold, so no churn
        broker.set_stop_order("NVDA", "stop-1", dec!(97.90));
        broker.set_price("NVDA", dec!(100));

        let mut bot = bot_with(broker.clone(), vec![]).await;
        bot.reconcile_fills().await.unwrap();
        bot.manage_stops().await.unwrap();

        assert!(broker.replaced_stops().is_empty());
    }
}
