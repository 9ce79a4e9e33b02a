use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::domain::approvals::ApprovalStatus;
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "durableStore": state.app.stores.is_durable(),
        "dryRun": state.app.config.effective_dry_run(),
    }))
}

pub async fn health_full(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let kill_switch = set.kill_switch.load().await?;
    let pending = set.approvals.by_status(ApprovalStatus::Pending).await?.len();
    let snapshots = set.snapshots.count().await?;
    let recent_executions = set.executions.recent(5).await?;

    Ok(Json(json!({
        "status": "ok",
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
        "durableStore": state.app.stores.is_durable(),
        "dryRun": state.app.config.effective_dry_run(),
        "killSwitch": kill_switch,
        "breakerTripped": state.app.risk.is_tripped(),
        "pendingApprovals": pending,
        "snapshotCount": snapshots,
        "sseSubscribers": state.app.bus.subscriber_count(),
        "lastExecutions": recent_executions,
    })))
}

pub async fn status() -> Json<Value> {
    Json(json!({
        "status": "running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
