use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::lots::LotBook;
use crate::domain::repositories::{LotRepository, RiskStateRepository};
use crate::domain::risk::state::RiskState;
use crate::infrastructure::persistence::database::Database;

pub struct SqliteRiskStateRepository {
    database: Database,
}

impl SqliteRiskStateRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RiskStateRepository for SqliteRiskStateRepository {
    async fn load(&self) -> Result<Option<RiskState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM risk_state WHERE id = 'global'")
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load risk state")?;

        row.map(|(body,)| serde_json::from_str(&body).context("Failed to parse risk state"))
            .transpose()
    }

    async fn save(&self, state: &RiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_state (id, body, updated_at) VALUES ('global', $1, $2)
            ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(serde_json::to_string(state)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to save risk state")?;
        Ok(())
    }
}

pub struct SqliteLotRepository {
    database: Database,
}

impl SqliteLotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl LotRepository for SqliteLotRepository {
    async fn load(&self) -> Result<LotBook> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM lots WHERE id = 'global'")
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load lot book")?;

        match row {
            Some((body,)) => serde_json::from_str(&body).context("Failed to parse lot book"),
            None => Ok(LotBook::default()),
        }
    }

    async fn save(&self, book: &LotBook) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lots (id, body) VALUES ('global', $1)
            ON CONFLICT(id) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(serde_json::to_string(book)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save lot book")?;
        Ok(())
    }
}
