use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::application::system::Application;
use crate::interfaces::http::error::ApiError;

/// Minimum gap between forced live snapshots.
const FORCE_SNAPSHOT_COOLDOWN_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<Application>,
    pub started_at: DateTime<Utc>,
    force_snapshot_gate: Arc<Mutex<Option<Instant>>>,
}

impl AppState {
    pub fn new(app: Arc<Application>) -> Self {
        Self {
            app,
            started_at: Utc::now(),
            force_snapshot_gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Mutations need the durable store.
    pub fn require_durable(&self) -> Result<(), ApiError> {
        if self.app.stores.is_durable() {
            Ok(())
        } else {
            Err(ApiError::Unavailable(
                "durable store unavailable; retry later".to_string(),
            ))
        }
    }

    /// Unauthenticated but rate-limited: one forced snapshot per window.
    pub fn check_force_snapshot_rate(&self) -> Result<(), ApiError> {
        let mut gate = self.force_snapshot_gate.lock().unwrap();
        if let Some(last) = *gate
            && last.elapsed().as_secs() < FORCE_SNAPSHOT_COOLDOWN_SECS
        {
            return Err(ApiError::RateLimited(format!(
                "forced snapshot allowed once per {FORCE_SNAPSHOT_COOLDOWN_SECS}s"
            )));
        }
        *gate = Some(Instant::now());
        Ok(())
    }
}
