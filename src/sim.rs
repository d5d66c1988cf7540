//! Bar-driven strategy simulation over historical daily data.
//!
//! Replays daily bars through the same selector, risk, and ledger code
//! the live loop uses: entries come from the per-bar setup tags, stops
//! trail by ATR multiples, and an exit fires when a bar's low touches
//! the stop. Fills execute at the stop price, the pessimistic
//! convention.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::engine::{
    size_entry, CandidateSelector, EngineConfig, PositionLedger, RiskConfig, RiskEngine,
    SizingOutcome,
};
use crate::models::{Candidate, Setup};

/// One daily bar with precomputed indicators and setup tag.
#[derive(Debug, Clone, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub close: Decimal,
    pub low: Decimal,
    pub atr: Decimal,
    pub rsi: f64,
    pub relative_volume: f64,
    #[serde(default)]
    pub setup: Setup,
}

/// Daily bar history for one ticker, oldest first.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerSeries {
    pub ticker: String,
    pub bars: Vec<Bar>,
}

/// Simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Starting capital
    pub initial_capital: Decimal,

    /// Selection and sizing parameters
    pub engine: EngineConfig,

    /// Stop placement and trailing parameters
    pub risk: RiskConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(10000),
            engine: EngineConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

/// A completed round trip in the simulation.
#[derive(Debug, Clone)]
pub struct SimTrade {
    pub ticker: String,
    pub setup: Setup,
    pub shares: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub pnl: Decimal,
}

/// Per-setup performance breakdown.
#[derive(Debug, Clone, Default)]
pub struct SetupStats {
    pub trades: usize,
    pub winners: usize,
    pub total_pnl: Decimal,
}

/// Simulation results summary.
#[derive(Debug, Clone)]
pub struct SimReport {
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub open_at_end: usize,
    pub by_setup: HashMap<&'static str, SetupStats>,
    pub trades: Vec<SimTrade>,
    pub equity_curve: Vec<(NaiveDate, Decimal)>,
}

impl std::fmt::Display for SimReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " SIMULATION RESULTS ")?;
        if let (Some(first), Some(last)) = (self.equity_curve.first(), self.equity_curve.last()) {
            writeln!(f, "Period: {} to {}", first.0, last.0)?;
        }
        writeln!(f)?;
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_capital)?;
        writeln!(f, "Final:       ${:.2}", self.final_equity)?;
        writeln!(f, "Return:      {:.2}%", self.total_return_pct * dec!(100))?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Closed:      {} ({} still open)", self.total_trades, self.open_at_end)?;
        writeln!(f, "Winners:     {} ({:.1}%)", self.winning_trades, self.win_rate * 100.0)?;
        writeln!(f, "Losers:      {}", self.losing_trades)?;
        writeln!(f, "Avg Win:     ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:    ${:.2}", self.avg_loss)?;
        writeln!(f)?;
        writeln!(f, "--- Risk Metrics ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown_pct * 100.0)?;
        writeln!(f, "Sharpe Ratio: {:.2}", self.sharpe_ratio)?;
        writeln!(f)?;
        writeln!(f, "--- By Setup ---")?;
        let mut setups: Vec<_> = self.by_setup.iter().collect();
        setups.sort_by_key(|(name, _)| *name);
        for (name, stats) in setups {
            writeln!(
                f,
                "{:<15} {} trades, {} winners, ${:.2}",
                name, stats.trades, stats.winners, stats.total_pnl
            )?;
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

struct EntryMeta {
    setup: Setup,
    entry_price: Decimal,
    entry_date: NaiveDate,
}

/// Strategy simulator.
pub struct Simulator {
    config: SimConfig,
    selector: CandidateSelector,
    risk: RiskEngine,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        let selector = CandidateSelector::new(config.engine.clone(), config.risk.clone());
        let risk = RiskEngine::new(config.risk.clone());
        Self {
            config,
            selector,
            risk,
        }
    }

    /// Run the simulation over the given histories. Ticker histories
    /// are aligned by calendar date; the output is fully determined by
    /// the input data and configuration.
    pub fn run(&self, series: &[TickerSeries]) -> Result<SimReport> {
        if series.is_empty() {
            anyhow::bail!("No ticker histories to simulate");
        }

        // Align bars across tickers by date
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut bars_by_ticker: HashMap<&str, HashMap<NaiveDate, &Bar>> = HashMap::new();
        for ts in series {
            let by_date = bars_by_ticker.entry(ts.ticker.as_str()).or_default();
            for bar in &ts.bars {
                dates.insert(bar.date);
                by_date.insert(bar.date, bar);
            }
        }

        info!(
            tickers = series.len(),
            days = dates.len(),
            "Starting simulation"
        );

        let mut cash = self.config.initial_capital;
        let mut ledger = PositionLedger::new(self.config.risk.fallback_stop_pct);
        let mut entry_meta: HashMap<String, EntryMeta> = HashMap::new();
        let mut trades: Vec<SimTrade> = Vec::new();
        let mut equity_curve: Vec<(NaiveDate, Decimal)> = Vec::new();
        let mut last_close: HashMap<String, Decimal> = HashMap::new();

        let empty_pending = std::collections::HashSet::new();

        for &date in &dates {
            // 1. Manage open positions: trail stops, then exit on touch.
            //    Sorted order keeps runs reproducible.
            let held: Vec<String> = {
                let mut tickers: Vec<String> =
                    ledger.open_tickers().map(|t| t.to_string()).collect();
                tickers.sort();
                tickers
            };

            for ticker in held {
                let bar = match bars_by_ticker.get(ticker.as_str()).and_then(|m| m.get(&date)) {
                    Some(b) => *b,
                    None => continue,
                };
                last_close.insert(ticker.clone(), bar.close);

                // Exit checks against the stop carried in from prior
                // bars; the trail only advances when the bar survives
                let exit = {
                    let position = ledger
                        .get_mut(&ticker)
                        .context("Held ticker missing from ledger")?;
                    let exit = self
                        .risk
                        .exit_on_bar(position, bar.low)
                        .map(|stop| (stop, position.shares));
                    if exit.is_none() {
                        self.risk.observe_bar(position, bar.close, bar.atr);
                    }
                    exit
                };

                if let Some((stop, shares)) = exit {
                    let timestamp = date
                        .and_hms_opt(21, 0, 0)
                        .context("Invalid timestamp")?
                        .and_utc();
                    let outcome = ledger
                        .apply_sell(&ticker, shares, stop, timestamp)
                        .context("Exit for a ticker the ledger does not hold")?;
                    cash += stop * Decimal::from(shares);

                    let meta = entry_meta
                        .remove(&ticker)
                        .context("Exit without entry record")?;
                    debug!(ticker = %ticker, exit = %stop, pnl = %outcome.realized.realized_pnl, "Stopped out");
                    trades.push(SimTrade {
                        ticker,
                        setup: meta.setup,
                        shares,
                        entry_price: meta.entry_price,
                        exit_price: stop,
                        entry_date: meta.entry_date,
                        exit_date: date,
                        pnl: outcome.realized.realized_pnl,
                    });
                }
            }

            // 2. Candidates from today's tagged bars, in sorted ticker
            //    order so selection ties break the same way every run
            let mut candidates: Vec<Candidate> = Vec::new();
            let mut tagged: Vec<(&str, &Bar)> = bars_by_ticker
                .iter()
                .filter_map(|(ticker, by_date)| {
                    by_date
                        .get(&date)
                        .filter(|bar| bar.setup != Setup::None)
                        .map(|bar| (*ticker, *bar))
                })
                .collect();
            tagged.sort_by_key(|(ticker, _)| *ticker);
            for (ticker, bar) in tagged {
                last_close.insert(ticker.to_string(), bar.close);
                candidates.push(Candidate {
                    ticker: ticker.to_string(),
                    setup: bar.setup,
                    price: bar.close,
                    atr: bar.atr,
                    rsi: bar.rsi,
                    relative_volume: bar.relative_volume,
                });
            }

            // 3. Enter selected candidates, sizing against current equity
            let open: std::collections::HashSet<String> =
                ledger.open_tickers().map(|t| t.to_string()).collect();
            let equity = cash
                + ledger
                    .positions()
                    .map(|p| {
                        let price = last_close.get(&p.ticker).copied().unwrap_or(p.cost_basis);
                        p.market_value(price)
                    })
                    .sum::<Decimal>();

            for plan in self.selector.select(&candidates, &open, &empty_pending) {
                let shares = match size_entry(
                    equity,
                    self.config.engine.allocation_per_trade,
                    plan.candidate.price,
                ) {
                    SizingOutcome::Shares(n) => n,
                    SizingOutcome::InsufficientFunds => {
                        debug!(ticker = %plan.candidate.ticker, "Allocation below one share, skipping");
                        continue;
                    }
                };
                let cost = plan.candidate.price * Decimal::from(shares);
                if cost > cash {
                    debug!(ticker = %plan.candidate.ticker, cost = %cost, cash = %cash, "Insufficient cash, skipping");
                    continue;
                }

                let timestamp = date
                    .and_hms_opt(21, 0, 0)
                    .context("Invalid timestamp")?
                    .and_utc();
                cash -= cost;
                ledger.apply_buy(
                    &plan.candidate.ticker,
                    shares,
                    plan.candidate.price,
                    timestamp,
                    Some(plan.initial_stop),
                    plan.candidate.setup,
                );
                entry_meta.insert(
                    plan.candidate.ticker.clone(),
                    EntryMeta {
                        setup: plan.candidate.setup,
                        entry_price: plan.candidate.price,
                        entry_date: date,
                    },
                );
                debug!(
                    ticker = %plan.candidate.ticker,
                    shares,
                    price = %plan.candidate.price,
                    stop = %plan.initial_stop,
                    "Entered"
                );
            }

            // 4. Mark equity at today's closes
            let equity = cash
                + ledger
                    .positions()
                    .map(|p| {
                        let price = last_close.get(&p.ticker).copied().unwrap_or(p.cost_basis);
                        p.market_value(price)
                    })
                    .sum::<Decimal>();
            equity_curve.push((date, equity));
        }

        Ok(self.build_report(cash, &ledger, &last_close, trades, equity_curve))
    }

    fn build_report(
        &self,
        cash: Decimal,
        ledger: &PositionLedger,
        last_close: &HashMap<String, Decimal>,
        trades: Vec<SimTrade>,
        equity_curve: Vec<(NaiveDate, Decimal)>,
    ) -> SimReport {
        let final_equity = cash
            + ledger
                .positions()
                .map(|p| {
                    let price = last_close.get(&p.ticker).copied().unwrap_or(p.cost_basis);
                    p.market_value(price)
                })
                .sum::<Decimal>();

        let winners: Vec<&SimTrade> = trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
        let losers: Vec<&SimTrade> = trades.iter().filter(|t| t.pnl < Decimal::ZERO).collect();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winners.len() as f64 / trades.len() as f64
        };
        let avg_win = if winners.is_empty() {
            Decimal::ZERO
        } else {
            winners.iter().map(|t| t.pnl).sum::<Decimal>() / Decimal::from(winners.len())
        };
        let avg_loss = if losers.is_empty() {
            Decimal::ZERO
        } else {
            losers.iter().map(|t| t.pnl.abs()).sum::<Decimal>() / Decimal::from(losers.len())
        };

        // Max drawdown over the equity curve
        let mut peak = Decimal::ZERO;
        let mut max_dd = 0.0f64;
        for (_, equity) in &equity_curve {
            if *equity > peak {
                peak = *equity;
            }
            if peak > Decimal::ZERO {
                let dd = ((peak - equity) / peak).to_f64().unwrap_or(0.0);
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }

        // Annualized Sharpe from daily returns
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].1.to_f64()?;
                let curr = w[1].1.to_f64()?;
                if prev > 0.0 {
                    Some((curr - prev) / prev)
                } else {
                    None
                }
            })
            .collect();
        let sharpe = if returns.len() < 2 {
            0.0
        } else {
            let mean = returns.iter().mean();
            let std_dev = returns.iter().std_dev();
            if std_dev > 0.0 {
                (mean / std_dev) * (252.0f64).sqrt()
            } else {
                0.0
            }
        };

        let mut by_setup: HashMap<&'static str, SetupStats> = HashMap::new();
        for trade in &trades {
            let stats = by_setup.entry(trade.setup.as_str()).or_default();
            stats.trades += 1;
            if trade.pnl > Decimal::ZERO {
                stats.winners += 1;
            }
            stats.total_pnl += trade.pnl;
        }

        SimReport {
            initial_capital: self.config.initial_capital,
            final_equity,
            total_return_pct: if self.config.initial_capital.is_zero() {
                Decimal::ZERO
            } else {
                (final_equity - self.config.initial_capital) / self.config.initial_capital
            },
            total_trades: trades.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            avg_win,
            avg_loss,
            max_drawdown_pct: max_dd,
            sharpe_ratio: sharpe,
            open_at_end: ledger.len(),
            by_setup,
            trades,
            equity_curve,
        }
    }
}

/// Load ticker histories from a JSON file.
pub fn load_series(path: &std::path::Path) -> Result<Vec<TickerSeries>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read data file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse data file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: Decimal, low: Decimal, setup: Setup) -> Bar {
        Bar {
            date: date.parse().unwrap(),
            close,
            low,
            atr: dec!(2),
            rsi: if setup == Setup::Panic { 25.0 } else { 60.0 },
            relative_volume: if setup.is_momentum() { 2.5 } else { 1.0 },
            setup,
        }
    }

    fn uptrend_then_stop() -> Vec<TickerSeries> {
        vec![TickerSeries {
            ticker: "NVDA".to_string(),
            bars: vec![
                // Entry at 50, stop 46 (ATR 2, k_entry 2)
                bar("2024-06-03", dec!(50), dec!(49), Setup::Momentum),
                // Rally to 60: stop trails to 56
                bar("2024-06-04", dec!(60), dec!(52), Setup::None),
                // Low touches 56: stopped out at 56
                bar("2024-06-05", dec!(57), dec!(55.5), Setup::None),
            ],
        }]
    }

    #[test]
    fn test_trailing_exit_round_trip() {
        let sim = Simulator::new(SimConfig::default());
        let report = sim.run(&uptrend_then_stop()).unwrap();

        assert_eq!(report.total_trades, 1);
        assert_eq!(report.open_at_end, 0);

        let trade = &report.trades[0];
        assert_eq!(trade.entry_price, dec!(50));
        assert_eq!(trade.exit_price, dec!(56));
        // 10% of 10_000 = 1_000 at 50 => 20 shares, +6 each
        assert_eq!(trade.shares, 20);
        assert_eq!(trade.pnl, dec!(120));
        assert_eq!(report.final_equity, dec!(10120));
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let series = uptrend_then_stop();
        let sim = Simulator::new(SimConfig::default());

        let a = sim.run(&series).unwrap();
        let b = sim.run(&series).unwrap();

        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.total_trades, b.total_trades);
        assert_eq!(a.equity_curve, b.equity_curve);
    }

    #[test]
    fn test_no_reentry_while_holding() {
        // Second momentum tag on a held ticker must not add a trade
        let series = vec![TickerSeries {
            ticker: "NVDA".to_string(),
            bars: vec![
                bar("2024-06-03", dec!(50), dec!(49), Setup::Momentum),
                bar("2024-06-04", dec!(52), dec!(50), Setup::Momentum),
                bar("2024-06-05", dec!(54), dec!(51), Setup::None),
            ],
        }];
        let sim = Simulator::new(SimConfig::default());
        let report = sim.run(&series).unwrap();

        assert_eq!(report.total_trades, 0);
        assert_eq!(report.open_at_end, 1);
        // One entry of 20 shares marked at the last close
        assert_eq!(report.final_equity, dec!(10000) - dec!(1000) + dec!(20) * dec!(54));
    }

    #[test]
    fn test_untagged_bars_never_enter() {
        let series = vec![TickerSeries {
            ticker: "SPY".to_string(),
            bars: vec![
                bar("2024-06-03", dec!(500), dec!(498), Setup::None),
                bar("2024-06-04", dec!(505), dec!(501), Setup::None),
            ],
        }];
        let sim = Simulator::new(SimConfig::default());
        let report = sim.run(&series).unwrap();

        assert_eq!(report.total_trades, 0);
        assert_eq!(report.final_equity, dec!(10000));
    }
}
