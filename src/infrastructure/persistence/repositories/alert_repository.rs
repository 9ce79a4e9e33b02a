use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::domain::events::AlertRecord;
use crate::domain::repositories::AlertRepository;
use crate::infrastructure::persistence::database::Database;

/// Durable store for critical alerts only; everything else is transient.
pub struct SqliteAlertRepository {
    database: Database,
}

impl SqliteAlertRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn save(&self, alert: &AlertRecord) -> Result<()> {
        sqlx::query("INSERT INTO alerts (timestamp, body) VALUES ($1, $2)")
            .bind(alert.timestamp.timestamp_millis())
            .bind(serde_json::to_string(alert)?)
            .execute(&self.database.pool)
            .await
            .context("Failed to save alert")?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT body FROM alerts ORDER BY timestamp DESC LIMIT $1")
                .bind(limit as i64)
                .fetch_all(&self.database.pool)
                .await
                .context("Failed to list alerts")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse alert"))
            .collect()
    }
}
