use axum::http::HeaderMap;

use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

/// Header carrying the owner identity on mutating requests.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Mutating endpoints must present the configured owner identity.
/// Absent configuration means no mutation is ever authorized.
pub fn require_owner(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(expected) = state.app.config.owner_id.as_deref() else {
        return Err(ApiError::Unauthorized(
            "owner identity not configured".to_string(),
        ));
    };

    let presented = headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented != expected {
        return Err(ApiError::Unauthorized("owner mismatch".to_string()));
    }
    Ok(presented.to_string())
}
