use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::repositories::PriceRepository;
use crate::domain::types::PricePoint;
use crate::infrastructure::persistence::database::Database;

pub struct SqlitePriceRepository {
    database: Database,
}

impl SqlitePriceRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PriceRepository for SqlitePriceRepository {
    async fn append(&self, points: &[PricePoint]) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        for point in points {
            sqlx::query("INSERT INTO price_points (symbol, price, timestamp) VALUES ($1, $2, $3)")
                .bind(&point.symbol)
                .bind(point.price.to_string())
                .bind(point.timestamp.timestamp_millis())
                .execute(&mut *tx)
                .await
                .context("Failed to append price point")?;
        }
        tx.commit().await.context("Failed to commit price batch")?;
        Ok(())
    }

    async fn series(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            SELECT symbol, price, timestamp FROM price_points
            WHERE symbol = $1 AND timestamp >= $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(since.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load price series")?;

        Ok(rows
            .into_iter()
            .map(|(symbol, price, ts)| PricePoint {
                symbol,
                price: Decimal::from_str(&price).unwrap_or_default(),
                timestamp: DateTime::from_timestamp_millis(ts).unwrap_or_default(),
            })
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<()> {
        sqlx::query("DELETE FROM price_points WHERE timestamp < $1")
            .bind(cutoff.timestamp_millis())
            .execute(&self.database.pool)
            .await
            .context("Failed to prune price points")?;
        Ok(())
    }
}
