use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::repositories::CollateralRepository;
use crate::domain::types::CollateralRecord;
use crate::infrastructure::persistence::database::Database;

pub struct SqliteCollateralRepository {
    database: Database,
}

impl SqliteCollateralRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl CollateralRepository for SqliteCollateralRepository {
    /// Delete-then-insert inside one transaction; the version bump is part
    /// of the same transaction so readers see either the old set or the
    /// new one, never a mix.
    async fn replace_all(&self, records: &[CollateralRecord]) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;

        sqlx::query("DELETE FROM collateral")
            .execute(&mut *tx)
            .await
            .context("Failed to clear collateral")?;

        for record in records {
            sqlx::query(
                "INSERT INTO collateral (asset, locked, ltv, health) VALUES ($1, $2, $3, $4)",
            )
            .bind(&record.asset)
            .bind(record.locked.to_string())
            .bind(record.ltv.to_string())
            .bind(record.health.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert collateral record")?;
        }

        sqlx::query(
            r#"
            INSERT INTO collateral_version (id, version) VALUES (1, 1)
            ON CONFLICT(id) DO UPDATE SET version = version + 1
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("Failed to bump collateral version")?;

        tx.commit().await.context("Failed to commit collateral replace")?;
        Ok(())
    }

    async fn all(&self) -> Result<(u64, Vec<CollateralRecord>)> {
        let version: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM collateral_version WHERE id = 1")
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to read collateral version")?;

        let rows = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT asset, locked, ltv, health FROM collateral",
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load collateral")?;

        let records = rows
            .into_iter()
            .map(|(asset, locked, ltv, health)| CollateralRecord {
                asset,
                locked: Decimal::from_str(&locked).unwrap_or_default(),
                ltv: Decimal::from_str(&ltv).unwrap_or_default(),
                health: Decimal::from_str(&health).unwrap_or_default(),
            })
            .collect();

        Ok((version.map(|(v,)| v as u64).unwrap_or(0), records))
    }
}
