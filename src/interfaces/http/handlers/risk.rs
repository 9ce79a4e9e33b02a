use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::events::{BusEvent, EventKind};
use crate::domain::objectives::Objectives;
use crate::domain::types::KillSwitch;
use crate::interfaces::http::auth::require_owner;
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

pub async fn risk_state(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.app.risk.snapshot(Utc::now());
    Json(json!({
        "tradesLastHour": snapshot.trades_last_hour(),
        "dailyRealizedPnl": snapshot.daily_realized_pnl,
        "breaker": snapshot.breaker,
        "lastExecutions": snapshot.last_execution,
        "openReservations": snapshot.reservations.len(),
    }))
}

pub async fn get_kill_switch(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let kill_switch = set.kill_switch.load().await?;
    Ok(Json(json!(kill_switch)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchBody {
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub set_by: Option<String>,
}

pub async fn set_kill_switch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KillSwitchBody>,
) -> Result<Json<Value>, ApiError> {
    let owner = require_owner(&state, &headers)?;
    state.require_durable()?;

    let kill_switch = KillSwitch {
        enabled: body.enabled,
        reason: body.reason,
        set_by: Some(body.set_by.unwrap_or(owner)),
        set_at: Some(Utc::now()),
    };
    let set = state.app.stores.set().await;
    set.kill_switch.save(&kill_switch).await?;

    state.app.bus.publish(BusEvent::new(
        EventKind::KillSwitchChanged,
        json!(kill_switch),
    ));

    // Enabling parks approved-but-unexecuted approvals; disabling
    // resumes them.
    if body.enabled {
        state.app.workflow.defer_unexecuted().await?;
    } else {
        state.app.workflow.resume_deferred().await?;
    }

    Ok(Json(json!(kill_switch)))
}

pub async fn get_objectives(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let objectives = set.objectives.load().await?.unwrap_or_default();
    Ok(Json(json!(objectives)))
}

pub async fn put_objectives(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(objectives): Json<Objectives>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &headers)?;
    state.require_durable()?;

    let set = state.app.stores.set().await;
    set.objectives.save(&objectives).await?;
    Ok(Json(json!(objectives)))
}
