use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::repositories::{RuleMetricsRepository, RuleRepository};
use crate::domain::rules::dsl::Rule;
use crate::domain::rules::metrics::RuleMetrics;
use crate::infrastructure::persistence::database::Database;

pub struct SqliteRuleRepository {
    database: Database,
}

impl SqliteRuleRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn create(&self, rule: &Rule) -> Result<Rule> {
        let mut tx = self.database.pool.begin().await?;

        let (next_id,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(id), 0) + 1 FROM rules")
                .fetch_one(&mut *tx)
                .await
                .context("Failed to allocate rule id")?;

        let mut stored = rule.clone();
        stored.id = next_id;
        stored.version = 1;

        sqlx::query(
            "INSERT INTO rules (id, version, body, enabled, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(stored.id)
        .bind(stored.version)
        .bind(stored.to_json())
        .bind(stored.enabled)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await
        .context("Failed to insert rule")?;

        tx.commit().await.context("Failed to commit rule create")?;
        Ok(stored)
    }

    async fn save_version(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            "INSERT INTO rules (id, version, body, enabled, updated_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(rule.id)
        .bind(rule.version)
        .bind(rule.to_json())
        .bind(rule.enabled)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to save rule version")?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Rule>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM rules WHERE id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load rule")?;

        row.map(|(body,)| Rule::from_json(&body).map_err(Into::into))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT body FROM rules r
            WHERE version = (SELECT MAX(version) FROM rules WHERE id = r.id)
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list rules")?;

        rows.into_iter()
            .map(|(body,)| Rule::from_json(&body).map_err(Into::into))
            .collect()
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        // Disabling is the soft delete: the body is rewritten so the
        // latest version round-trips with the flag.
        let Some(mut rule) = self.get(id).await? else {
            anyhow::bail!("rule {id} not found");
        };
        rule.enabled = enabled;
        sqlx::query(
            "UPDATE rules SET body = $1, enabled = $2, updated_at = $3 WHERE id = $4 AND version = $5",
        )
        .bind(rule.to_json())
        .bind(enabled)
        .bind(Utc::now().timestamp_millis())
        .bind(rule.id)
        .bind(rule.version)
        .execute(&self.database.pool)
        .await
        .context("Failed to toggle rule")?;
        Ok(())
    }
}

pub struct SqliteRuleMetricsRepository {
    database: Database,
}

impl SqliteRuleMetricsRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RuleMetricsRepository for SqliteRuleMetricsRepository {
    async fn append(&self, metrics: &RuleMetrics) -> Result<()> {
        sqlx::query("INSERT INTO rule_metrics (rule_id, created_at, body) VALUES ($1, $2, $3)")
            .bind(metrics.rule_id)
            .bind(metrics.created_at.timestamp_millis())
            .bind(serde_json::to_string(metrics)?)
            .execute(&self.database.pool)
            .await
            .context("Failed to append rule metrics")?;
        Ok(())
    }

    async fn for_rule(&self, rule_id: i64) -> Result<Vec<RuleMetrics>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM rule_metrics WHERE rule_id = $1 ORDER BY created_at ASC",
        )
        .bind(rule_id)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load rule metrics")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse rule metrics"))
            .collect()
    }
}
