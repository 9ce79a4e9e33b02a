use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::interfaces::http::auth::require_owner;
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

pub async fn current(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let snapshot = match set.snapshots.latest().await? {
        Some(snapshot) => Some(snapshot),
        // Degraded mode still serves the cached copy.
        None => state.app.portfolio.cached_snapshot().await,
    };
    let Some(snapshot) = snapshot else {
        return Err(ApiError::NotFound("no snapshot yet".to_string()));
    };

    let baselines = set.baselines.all().await?;
    let age_secs = (Utc::now() - snapshot.timestamp).num_seconds();

    Ok(Json(json!({
        "snapshot": snapshot,
        "baselines": baselines,
        "ageSecs": age_secs,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSnapshotBody {
    pub balances: HashMap<String, Decimal>,
    #[serde(default)]
    pub prices: HashMap<String, Decimal>,
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default)]
    pub is_deposit: bool,
    #[serde(default)]
    pub deposit_amounts: HashMap<String, Decimal>,
}

fn default_reason() -> String {
    "manual".to_string()
}

pub async fn manual_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ManualSnapshotBody>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let snapshot = state
        .app
        .portfolio
        .manual_snapshot(
            body.balances,
            body.prices,
            &body.reason,
            body.is_deposit,
            body.deposit_amounts,
        )
        .await?;
    Ok(Json(json!({ "snapshot": snapshot })))
}

pub async fn force_snapshot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.check_force_snapshot_rate()?;
    state.require_durable()?;
    let snapshot = state.app.portfolio.refresh_portfolio("forced").await?;
    Ok(Json(json!({ "snapshot": snapshot })))
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    pub since: DateTime<Utc>,
}

pub async fn changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<Value>, ApiError> {
    let changes = state
        .app
        .portfolio
        .changes_since(query.since)
        .await?
        .ok_or_else(|| ApiError::NotFound("no snapshot yet".to_string()))?;
    Ok(Json(json!(changes)))
}
