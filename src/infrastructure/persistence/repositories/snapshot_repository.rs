use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::repositories::SnapshotRepository;
use crate::domain::types::Snapshot;
use crate::infrastructure::persistence::database::Database;

pub struct SqliteSnapshotRepository {
    database: Database,
}

impl SqliteSnapshotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn from_row(
        timestamp: i64,
        balances_json: String,
        prices_json: String,
        total_usd: String,
        reason: String,
    ) -> Result<Snapshot> {
        let balances: HashMap<String, Decimal> =
            serde_json::from_str(&balances_json).context("Failed to parse snapshot balances")?;
        let prices: HashMap<String, Decimal> =
            serde_json::from_str(&prices_json).context("Failed to parse snapshot prices")?;
        Ok(Snapshot {
            timestamp: DateTime::from_timestamp_millis(timestamp)
                .unwrap_or_default(),
            balances,
            prices,
            total_usd: Decimal::from_str(&total_usd).unwrap_or_default(),
            reason,
        })
    }
}

type SnapshotRow = (i64, String, String, String, String);

#[async_trait]
impl SnapshotRepository for SqliteSnapshotRepository {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (timestamp, balances_json, prices_json, total_usd, reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot.timestamp.timestamp_millis())
        .bind(serde_json::to_string(&snapshot.balances)?)
        .bind(serde_json::to_string(&snapshot.prices)?)
        .bind(snapshot.total_usd.to_string())
        .bind(&snapshot.reason)
        .execute(&self.database.pool)
        .await
        .context("Failed to save snapshot")?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Snapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT timestamp, balances_json, prices_json, total_usd, reason
            FROM snapshots ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest snapshot")?;

        row.map(|(ts, b, p, t, r)| Self::from_row(ts, b, p, t, r))
            .transpose()
    }

    async fn latest_before(&self, at: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT timestamp, balances_json, prices_json, total_usd, reason
            FROM snapshots WHERE timestamp <= $1
            ORDER BY timestamp DESC LIMIT 1
            "#,
        )
        .bind(at.timestamp_millis())
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load snapshot before timestamp")?;

        row.map(|(ts, b, p, t, r)| Self::from_row(ts, b, p, t, r))
            .transpose()
    }

    async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT timestamp, balances_json, prices_json, total_usd, reason
            FROM snapshots WHERE timestamp >= $1 AND timestamp <= $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load snapshot range")?;

        rows.into_iter()
            .map(|(ts, b, p, t, r)| Self::from_row(ts, b, p, t, r))
            .collect()
    }

    async fn count(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.database.pool)
            .await
            .context("Failed to count snapshots")?;
        Ok(count as usize)
    }
}
