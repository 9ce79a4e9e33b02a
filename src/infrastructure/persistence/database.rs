use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper around the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                balances_json TEXT NOT NULL,
                prices_json TEXT NOT NULL,
                total_usd TEXT NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots (timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_points (
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_price_points_symbol_time
            ON price_points (symbol, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create price_points table")?;

        // Collateral is replaced wholesale each refresh; the version row
        // guards readers against observing a half-replaced set.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collateral (
                asset TEXT NOT NULL,
                locked TEXT NOT NULL,
                ltv TEXT NOT NULL,
                health TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS collateral_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create collateral tables")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS baselines (
                asset TEXT PRIMARY KEY,
                quantity TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create baselines table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS objectives (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create objectives table")?;

        // Rule edits bump the version; every version is retained.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (id, version)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create rules table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS approvals (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals (status, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create approvals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                approval_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_approval ON executions (approval_id);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create executions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_state (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS kill_switch (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS lots (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk tables")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rule_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rule_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rule_metrics_rule ON rule_metrics (rule_id, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create rule_metrics table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alerts table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
