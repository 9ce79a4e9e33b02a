use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::objectives::Objectives;
use crate::domain::repositories::{
    BaselineRepository, KillSwitchRepository, ObjectivesRepository,
};
use crate::domain::types::{Baseline, KillSwitch};
use crate::infrastructure::persistence::database::Database;

pub struct SqliteBaselineRepository {
    database: Database,
}

impl SqliteBaselineRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl BaselineRepository for SqliteBaselineRepository {
    async fn get(&self, asset: &str) -> Result<Option<Baseline>> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT asset, quantity, updated_at FROM baselines WHERE asset = $1",
        )
        .bind(asset)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load baseline")?;

        Ok(row.map(|(asset, quantity, updated_at)| Baseline {
            asset,
            quantity: Decimal::from_str(&quantity).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
        }))
    }

    async fn all(&self) -> Result<Vec<Baseline>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT asset, quantity, updated_at FROM baselines",
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load baselines")?;

        Ok(rows
            .into_iter()
            .map(|(asset, quantity, updated_at)| Baseline {
                asset,
                quantity: Decimal::from_str(&quantity).unwrap_or_default(),
                updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
            })
            .collect())
    }

    async fn upsert(&self, baseline: &Baseline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO baselines (asset, quantity, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT(asset) DO UPDATE SET
                quantity = excluded.quantity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&baseline.asset)
        .bind(baseline.quantity.to_string())
        .bind(baseline.updated_at.timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert baseline")?;
        Ok(())
    }
}

pub struct SqliteObjectivesRepository {
    database: Database,
}

impl SqliteObjectivesRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ObjectivesRepository for SqliteObjectivesRepository {
    async fn load(&self) -> Result<Option<Objectives>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM objectives WHERE id = 'owner'")
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load objectives")?;

        row.map(|(body,)| serde_json::from_str(&body).context("Failed to parse objectives"))
            .transpose()
    }

    async fn save(&self, objectives: &Objectives) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO objectives (id, body) VALUES ('owner', $1)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(serde_json::to_string(objectives)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save objectives")?;
        Ok(())
    }
}

pub struct SqliteKillSwitchRepository {
    database: Database,
}

impl SqliteKillSwitchRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl KillSwitchRepository for SqliteKillSwitchRepository {
    async fn load(&self) -> Result<KillSwitch> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM kill_switch WHERE id = 'global'")
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load kill switch")?;

        match row {
            Some((body,)) => serde_json::from_str(&body).context("Failed to parse kill switch"),
            None => Ok(KillSwitch::default()),
        }
    }

    async fn save(&self, state: &KillSwitch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kill_switch (id, body) VALUES ('global', $1)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(serde_json::to_string(state)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save kill switch")?;
        Ok(())
    }
}
