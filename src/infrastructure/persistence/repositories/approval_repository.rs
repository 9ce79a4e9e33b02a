use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::approvals::{Approval, ApprovalStatus, Execution};
use crate::domain::repositories::{ApprovalRepository, ExecutionRepository};
use crate::infrastructure::persistence::database::Database;

fn status_tag(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Declined => "declined",
        ApprovalStatus::Executed => "executed",
        ApprovalStatus::Expired => "expired",
        ApprovalStatus::Deferred => "deferred",
    }
}

pub struct SqliteApprovalRepository {
    database: Database,
}

impl SqliteApprovalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ApprovalRepository for SqliteApprovalRepository {
    async fn save(&self, approval: &Approval) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO approvals (id, status, created_at, body) VALUES ($1, $2, $3, $4)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body
            "#,
        )
        .bind(approval.id.to_string())
        .bind(status_tag(approval.status))
        .bind(approval.created_at.timestamp_millis())
        .bind(serde_json::to_string(approval)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save approval")?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Approval>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM approvals WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.database.pool)
                .await
                .context("Failed to load approval")?;

        row.map(|(body,)| serde_json::from_str(&body).context("Failed to parse approval"))
            .transpose()
    }

    async fn by_status(&self, status: ApprovalStatus) -> Result<Vec<Approval>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM approvals WHERE status = $1 ORDER BY created_at DESC",
        )
        .bind(status_tag(status))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load approvals by status")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse approval"))
            .collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<Approval>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM approvals ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list approvals")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse approval"))
            .collect()
    }
}

pub struct SqliteExecutionRepository {
    database: Database,
}

impl SqliteExecutionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            "INSERT INTO executions (id, approval_id, timestamp, body) VALUES ($1, $2, $3, $4)",
        )
        .bind(execution.id.to_string())
        .bind(execution.approval_id.to_string())
        .bind(execution.timestamp.timestamp_millis())
        .bind(serde_json::to_string(execution)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save execution")?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Execution>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM executions ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to list executions")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse execution"))
            .collect()
    }

    async fn by_approval(&self, approval_id: Uuid) -> Result<Vec<Execution>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM executions WHERE approval_id = $1 ORDER BY timestamp ASC",
        )
        .bind(approval_id.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load executions for approval")?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_str(&body).context("Failed to parse execution"))
            .collect()
    }
}
