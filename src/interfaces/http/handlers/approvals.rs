use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::domain::approvals::{ApprovalAction, ApprovalSource, ApprovalStatus};
use crate::interfaces::http::auth::require_owner;
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let approvals = set.approvals.list(200).await?;
    Ok(Json(json!({ "approvals": approvals })))
}

pub async fn pending(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let approvals = set.approvals.by_status(ApprovalStatus::Pending).await?;
    Ok(Json(json!({ "approvals": approvals })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApprovalBody {
    #[serde(default = "default_source")]
    pub source: ApprovalSource,
    pub action: ApprovalAction,
    pub reason: String,
}

fn default_source() -> ApprovalSource {
    ApprovalSource::Manual
}

/// Used by integrations (chat bots, dashboards) to queue a decision.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateApprovalBody>,
) -> Result<Json<Value>, ApiError> {
    state.require_durable()?;
    let approval = state
        .app
        .workflow
        .submit_external(body.source, body.action, body.reason)
        .await?;
    Ok(Json(json!({ "approval": approval })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchApprovalBody {
    pub status: ApprovalStatus,
    #[serde(default)]
    pub acted_by: Option<String>,
}

pub async fn patch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<PatchApprovalBody>,
) -> Result<Json<Value>, ApiError> {
    let owner = require_owner(&state, &headers)?;
    state.require_durable()?;

    let acted_by = body.acted_by.unwrap_or(owner);
    let approval = state
        .app
        .workflow
        .decide(id, body.status, &acted_by)
        .await?;
    Ok(Json(json!({ "approval": approval })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyMfaBody {
    pub code: String,
}

pub async fn verify_mfa(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<VerifyMfaBody>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let approval = state.app.workflow.verify_mfa(id, &body.code).await?;
    Ok(Json(json!({ "approval": approval })))
}
