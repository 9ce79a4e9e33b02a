use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::application::optimizer::backtester::{self, BacktestConfig};
use crate::domain::rules::dsl::Rule;
use crate::interfaces::http::auth::require_owner;
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

pub async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let rules = set.rules.list().await?;
    Ok(Json(json!({ "rules": rules })))
}

/// Create a rule from its DSL body; invalid DSL is a 400 with the
/// structured parse error.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let rule = Rule::from_json(&body)?;
    let set = state.app.stores.set().await;
    let created = set.rules.create(&rule).await?;
    Ok(Json(json!({ "rule": created })))
}

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    pub enabled: bool,
}

pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<ActivateBody>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let set = state.app.stores.set().await;
    set.rules.set_enabled(id, body.enabled).await?;
    Ok(Json(json!({ "id": id, "enabled": body.enabled })))
}

pub async fn metrics(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let metrics = set.rule_metrics.for_rule(id).await?;
    Ok(Json(json!({ "ruleId": id, "metrics": metrics })))
}

/// Run the nightly optimizer on demand.
pub async fn optimize(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let proposals = state.app.optimizer.run().await?;
    let summary: Vec<Value> = proposals
        .iter()
        .map(|p| {
            json!({
                "ruleId": p.rule_id,
                "rule": p.rule_name,
                "baselineScore": p.baseline_score,
                "candidateScore": p.candidate_score,
                "metrics": p.metrics,
            })
        })
        .collect();
    Ok(Json(json!({ "proposals": summary })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestBody {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub initial_balance: Option<HashMap<String, Decimal>>,
    #[serde(default)]
    pub initial_prices: Option<HashMap<String, Decimal>>,
}

pub async fn backtest(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<BacktestBody>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;

    let set = state.app.stores.set().await;
    let rule = set
        .rules
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("rule {id} not found")))?;

    let snapshots = set.snapshots.range(body.start_date, body.end_date).await?;
    if snapshots.len() < 2 {
        return Err(ApiError::BadRequest(
            "not enough snapshot history in the requested window".to_string(),
        ));
    }

    let config = BacktestConfig {
        initial_balances: body.initial_balance,
        initial_prices: body.initial_prices,
        ..Default::default()
    };
    let metrics = backtester::run(&rule, &snapshots, &config);
    Ok(Json(json!({ "ruleId": id, "metrics": metrics })))
}

/// One dry evaluation tick, on demand.
pub async fn evaluate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.app.tick.push_manual_trigger();
    let report = state.app.tick.run_tick(true).await?;
    Ok(Json(json!(report)))
}
