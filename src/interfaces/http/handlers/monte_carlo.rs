use axum::Json;
use axum::extract::State;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};

use crate::application::optimizer::monte_carlo::{self, MonteCarloRequest};
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

/// Seeded projection over the current portfolio value. UI-facing only;
/// nothing downstream trades on it.
pub async fn run(
    State(state): State<AppState>,
    Json(request): Json<MonteCarloRequest>,
) -> Result<Json<Value>, ApiError> {
    let set = state.app.stores.set().await;
    let initial_value = match set.snapshots.latest().await? {
        Some(snapshot) => snapshot.total_usd.to_f64().unwrap_or(0.0),
        None => 0.0,
    };
    if initial_value <= 0.0 {
        return Err(ApiError::BadRequest(
            "no portfolio value to project".to_string(),
        ));
    }

    let result = monte_carlo::run(initial_value, &request);
    Ok(Json(json!(result)))
}
