//! Swing-trading autopilot.
//!
//! Consumes scored setup candidates from a screener, sizes and submits
//! bracket entries, trails stops on open positions, and reconciles the
//! brokerage fill history into a local ledger.

mod bot;
mod broker;
mod db;
mod engine;
mod feed;
mod models;
mod notify;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::{Bot, BotConfig};
use crate::broker::AlpacaBroker;
use crate::db::Database;
use crate::engine::{AccountingEngine, EngineConfig, PositionLedger, RiskConfig};
use crate::feed::JsonSignalFeed;
use crate::sim::{load_series, SimConfig, Simulator};

/// Swing-trading autopilot CLI.
#[derive(Parser)]
#[command(name = "silentswing")]
#[command(about = "Trade momentum and panic setups with trailing stops", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./silentswing.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Signal file written by the screener
        #[arg(short, long, default_value = "signals.json")]
        signals: PathBuf,

        /// Polling interval in seconds
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Log intended orders instead of submitting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Replay the strategy over historical daily bars
    Simulate {
        /// JSON file of per-ticker bar histories
        #[arg(short, long)]
        data: PathBuf,

        /// Initial capital for simulation
        #[arg(short, long, default_value = "10000")]
        capital: f64,
    },

    /// Show bot status from the last session
    Status,

    /// Show the most recent fills
    Fills {
        /// Number of fills to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            signals,
            interval,
            dry_run,
        } => {
            info!(
                signals = %signals.display(),
                interval,
                dry_run,
                "Starting trading loop"
            );

            let mut engine_config = EngineConfig::default();
            engine_config.poll_interval_secs = interval;

            let bot_config = BotConfig {
                dry_run,
                database_url: cli.database.clone(),
                engine: engine_config,
                risk: RiskConfig::default(),
            };

            let broker = Arc::new(AlpacaBroker::from_env()?);
            let feed = Arc::new(JsonSignalFeed::new(signals));

            let mut bot = Bot::new(bot_config, broker, feed).await?;
            bot.initialize().await?;

            println!("\n=== Swing-Trading Autopilot ===");
            println!("Polling interval: {}s", interval);
            println!(
                "Mode: {}",
                if dry_run {
                    "DRY RUN (no real orders)"
                } else {
                    "LIVE TRADING"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            println!("\nRealized P&L this ledger: ${:.2}", bot.total_realized());
        }

        Commands::Simulate { data, capital } => {
            info!(data = %data.display(), capital, "Starting simulation");

            let series = load_series(&data)?;
            let sim_config = SimConfig {
                initial_capital: Decimal::try_from(capital)?,
                engine: EngineConfig::default(),
                risk: RiskConfig::default(),
            };

            let report = Simulator::new(sim_config).run(&series)?;
            println!("{}", report);
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;

            let bot_state = match db.get_bot_state().await {
                Ok(state) => state,
                Err(_) => {
                    println!("No bot session found. Run 'silentswing run' to start the bot.");
                    return Ok(());
                }
            };

            println!("\n=== Bot Status ===");
            println!(
                "Running:          {}",
                if bot_state.is_running { "Yes" } else { "No" }
            );
            println!("Started:          {}", bot_state.started_at);
            println!(
                "Last Poll:        {}",
                bot_state.last_poll_at.unwrap_or_else(|| "Never".to_string())
            );

            println!("\n=== Account ===");
            println!("Equity:           ${:.2}", bot_state.equity);
            println!("Realized P&L:     ${:.2}", bot_state.total_realized_pnl);
            println!("Fills Applied:    {}", bot_state.total_fills);

            let curve = db.get_equity_curve(5).await?;
            if !curve.is_empty() {
                println!("\n=== Recent Equity ===");
                for point in curve.iter().rev() {
                    println!("  {}  ${:.2}", point.timestamp, point.equity);
                }
            }
        }

        Commands::Fills { limit } => {
            let db = Database::new(&cli.database).await?;
            let fills = db.recent_fills(limit).await?;

            if fills.is_empty() {
                println!("No fills recorded.");
                return Ok(());
            }

            println!(
                "\n{:<22} {:<6} {:<5} {:>8} {:>12}",
                "TIME", "TICKER", "SIDE", "QTY", "PRICE"
            );
            println!("{}", "-".repeat(58));
            for fill in fills {
                println!(
                    "{:<22} {:<6} {:<5} {:>8} {:>12}",
                    fill.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    fill.ticker,
                    fill.side.as_str(),
                    fill.quantity,
                    format!("${}", fill.price)
                );
            }

            // Replay the whole log so the summary reflects every fill,
            // not just the ones listed above.
            let all = db.load_all_fills().await?;
            let (ledger, realized) =
                PositionLedger::replay(RiskConfig::default().fallback_stop_pct, &all);
            let total: Decimal = realized.iter().map(|t| t.realized_pnl).sum();

            println!("\n=== Replayed Ledger ===");
            if ledger.is_empty() {
                println!("No open positions.");
            } else {
                for pos in ledger.snapshot() {
                    println!(
                        "  {:<6} {:>6} shares @ ${}",
                        pos.ticker, pos.shares, pos.cost_basis
                    );
                }
            }
            println!("Realized P&L:     ${:.2}", total);

            // Zero-cash baseline: each point reads as cumulative P&L
            // with open positions marked at their last fill price
            let curve = AccountingEngine::equity_curve_from_fills(&all, Decimal::ZERO);
            if !curve.is_empty() {
                println!("\n=== P&L After Each Fill ===");
                let tail = curve.len().saturating_sub(5);
                for point in &curve[tail..] {
                    println!(
                        "  {}  ${:.2}",
                        point.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        point.equity
                    );
                }
            }
        }
    }

    Ok(())
}
