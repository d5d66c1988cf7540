//! Database persistence for the fill log and bot state.
//!
//! The time-ordered fill log is the durable source of truth: positions
//! and realized PnL are rebuilt from it on restart. `order_id` is the
//! primary key, so appending an already-seen fill is a no-op; that is
//! what makes reconciliation idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{FillEvent, FillSide};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Bot state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub id: i64,
    pub equity: f64,
    pub total_realized_pnl: f64,
    pub total_fills: i64,
    pub is_running: bool,
    pub last_poll_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Raw fill row; prices travel as TEXT so `Decimal` values survive
/// storage exactly.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredFill {
    pub order_id: String,
    pub ticker: String,
    pub side: String,
    pub quantity: i64,
    pub price: String,
    pub filled_at: String,
}

impl StoredFill {
    fn into_event(self) -> Result<FillEvent> {
        let side = FillSide::parse(&self.side)
            .with_context(|| format!("Unknown fill side '{}' for {}", self.side, self.order_id))?;
        let price: Decimal = self
            .price
            .parse()
            .with_context(|| format!("Bad stored price '{}' for {}", self.price, self.order_id))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.filled_at)
            .with_context(|| format!("Bad stored timestamp for {}", self.order_id))?
            .with_timezone(&Utc);

        Ok(FillEvent {
            order_id: self.order_id,
            ticker: self.ticker,
            side,
            quantity: self.quantity,
            price,
            timestamp,
        })
    }
}

/// Equity curve point for tracking account value over time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredEquityPoint {
    pub id: i64,
    pub timestamp: String,
    pub equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // An in-memory database exists per connection, so it must not
        // be spread across a pool
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Fill log (order_id is the dedup key)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                order_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price TEXT NOT NULL,
                filled_at TEXT NOT NULL,
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Bot state table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                equity REAL NOT NULL DEFAULT 0,
                total_realized_pnl REAL NOT NULL DEFAULT 0,
                total_fills INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_poll_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Equity curve
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                equity REAL NOT NULL,
                unrealized_pnl REAL NOT NULL DEFAULT 0,
                realized_pnl REAL NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_ticker ON fills(ticker)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_time ON fills(filled_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_curve_time ON equity_curve(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Fills ====================

    /// Append a fill to the log. Returns true when the fill was new,
    /// false when its order_id was already recorded.
    pub async fn append_fill(&self, fill: &FillEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO fills (order_id, ticker, side, quantity, price, filled_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fill.order_id)
        .bind(&fill.ticker)
        .bind(fill.side.as_str())
        .bind(fill.quantity)
        .bind(fill.price.to_string())
        .bind(fill.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load the whole fill log, oldest first, for replay.
    pub async fn load_all_fills(&self) -> Result<Vec<FillEvent>> {
        let rows: Vec<StoredFill> = sqlx::query_as(
            "SELECT order_id, ticker, side, quantity, price, filled_at FROM fills ORDER BY filled_at, order_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch fills")?;

        rows.into_iter().map(StoredFill::into_event).collect()
    }

    /// Most recent fills, newest first, for the status views.
    pub async fn recent_fills(&self, limit: i64) -> Result<Vec<FillEvent>> {
        let rows: Vec<StoredFill> = sqlx::query_as(
            "SELECT order_id, ticker, side, quantity, price, filled_at FROM fills ORDER BY filled_at DESC, order_id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent fills")?;

        rows.into_iter().map(StoredFill::into_event).collect()
    }

    // ==================== Bot State ====================

    /// Initialize or get bot state.
    pub async fn init_bot_state(&self, equity: f64) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, equity, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                equity = excluded.equity,
                is_running = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(equity)
        .execute(&self.pool)
        .await?;

        self.get_bot_state().await
    }

    /// Get current bot state.
    pub async fn get_bot_state(&self) -> Result<BotState> {
        sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Bot state not initialized")
    }

    /// Update bot state after a polling tick.
    pub async fn update_bot_state(
        &self,
        equity: f64,
        total_realized_pnl: f64,
        total_fills: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bot_state SET
                equity = ?,
                total_realized_pnl = ?,
                total_fills = ?,
                last_poll_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(equity)
        .bind(total_realized_pnl)
        .bind(total_fills)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark bot as stopped.
    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Equity Curve ====================

    /// Record an equity curve point.
    pub async fn record_equity_point(
        &self,
        equity: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO equity_curve (equity, unrealized_pnl, realized_pnl) VALUES (?, ?, ?)",
        )
        .bind(equity)
        .bind(unrealized_pnl)
        .bind(realized_pnl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent equity curve points.
    pub async fn get_equity_curve(&self, limit: i64) -> Result<Vec<StoredEquityPoint>> {
        sqlx::query_as::<_, StoredEquityPoint>(
            "SELECT * FROM equity_curve ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch equity curve")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn fill(order_id: &str, hour: u32) -> FillEvent {
        FillEvent {
            order_id: order_id.to_string(),
            ticker: "NVDA".to_string(),
            side: FillSide::Buy,
            quantity: 10,
            price: dec!(123.45),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_append_fill_is_idempotent() {
        let db = test_db().await;

        assert!(db.append_fill(&fill("ord-1", 9)).await.unwrap());
        assert!(!db.append_fill(&fill("ord-1", 9)).await.unwrap());

        let fills = db.load_all_fills().await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(123.45));
    }

    #[tokio::test]
    async fn test_fills_load_in_time_order() {
        let db = test_db().await;
        db.append_fill(&fill("late", 15)).await.unwrap();
        db.append_fill(&fill("early", 9)).await.unwrap();
        db.append_fill(&fill("mid", 12)).await.unwrap();

        let fills = db.load_all_fills().await.unwrap();
        let ids: Vec<&str> = fills.iter().map(|f| f.order_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid", "late"]);
    }

    #[tokio::test]
    async fn test_bot_state_lifecycle() {
        let db = test_db().await;

        let state = db.init_bot_state(10_000.0).await.unwrap();
        assert!(state.is_running);
        assert_eq!(state.equity, 10_000.0);

        db.update_bot_state(10_250.0, 250.0, 3).await.unwrap();
        db.mark_bot_stopped().await.unwrap();

        let state = db.get_bot_state().await.unwrap();
        assert!(!state.is_running);
        assert_eq!(state.total_fills, 3);
    }

    #[tokio::test]
    async fn test_equity_curve_roundtrip() {
        let db = test_db().await;
        db.record_equity_point(10_000.0, 0.0, 0.0).await.unwrap();
        db.record_equity_point(10_100.0, 50.0, 50.0).await.unwrap();

        let points = db.get_equity_curve(10).await.unwrap();
        assert_eq!(points.len(), 2);
    }
}
