//! Owner of the process-global risk state.
//!
//! Every mutation and read of the rolling counters goes through this
//! manager's enumerated API; nothing else touches the structure. The
//! mutex guards constant-work operations only, and persistence happens
//! outside the lock on a cloned value.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::stores::Stores;
use crate::domain::risk::state::RiskState;

#[derive(Clone)]
pub struct RiskStateManager {
    state: Arc<Mutex<RiskState>>,
    stores: Stores,
    daily_loss_limit_usd: Decimal,
}

impl RiskStateManager {
    pub fn new(stores: Stores, daily_loss_limit_usd: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(RiskState::default())),
            stores,
            daily_loss_limit_usd,
        }
    }

    /// Restore persisted counters on startup.
    pub async fn restore(&self) -> Result<()> {
        let set = self.stores.set().await;
        if let Some(saved) = set.risk_state.load().await? {
            *self.state.lock().unwrap() = saved;
            info!("risk state restored from store");
        }
        Ok(())
    }

    /// Snapshot of the state for pipeline evaluation, rolled to `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> RiskState {
        let mut guard = self.state.lock().unwrap();
        guard.roll_forward(now);
        guard.clone()
    }

    pub fn reserve(&self, id: Uuid, symbol: &str, quantity: Decimal) {
        self.state.lock().unwrap().reserve(id, symbol, quantity);
    }

    pub fn release(&self, id: &Uuid) {
        self.state.lock().unwrap().release(id);
    }

    pub fn record_execution(&self, now: DateTime<Utc>, symbol: &str, rule_id: Option<i64>) {
        let mut guard = self.state.lock().unwrap();
        guard.roll_forward(now);
        guard.record_execution(now, symbol, rule_id.unwrap_or(0));
    }

    /// Returns true when this loss tripped the breaker (caller alerts).
    pub fn add_realized_pnl(&self, now: DateTime<Utc>, delta: Decimal) -> bool {
        let tripped = self
            .state
            .lock()
            .unwrap()
            .add_realized_pnl(now, delta, self.daily_loss_limit_usd);
        if tripped {
            warn!(%delta, "daily loss limit breached; circuit breaker tripped");
        }
        tripped
    }

    pub fn daily_realized_pnl(&self) -> Decimal {
        self.state.lock().unwrap().daily_realized_pnl
    }

    pub fn is_tripped(&self) -> bool {
        self.state.lock().unwrap().is_tripped()
    }

    /// Persist the current counters (fire-and-forget on a schedule, or on
    /// shutdown for a lossless restart).
    pub async fn persist(&self) -> Result<()> {
        let copy = self.state.lock().unwrap().clone();
        let set = self.stores.set().await;
        set.risk_state.save(&copy).await
    }
}
