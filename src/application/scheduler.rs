//! Periodic background jobs.
//!
//! One task per job, each serialized against itself (an iteration must
//! finish before the next starts). The portfolio cadence adapts to
//! realized volatility; everything else runs on a fixed beat. All tasks
//! watch the shutdown channel and exit promptly when it flips.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::approval_workflow::ApprovalWorkflow;
use crate::application::optimizer::nightly::NightlyOptimizer;
use crate::application::portfolio_service::PortfolioService;
use crate::application::risk_manager::RiskStateManager;
use crate::application::stores::Stores;
use crate::application::tick_service::TickService;
use crate::domain::events::{BusEvent, EventKind};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::database::Database;

/// Portfolio cadence bounds for the adaptive controller.
const PORTFOLIO_INTERVAL_FLOOR: Duration = Duration::from_secs(60);
const PORTFOLIO_INTERVAL_CEILING: Duration = Duration::from_secs(15 * 60);

/// Hourly move that counts as "volatile" / "quiescent".
const VOLATILITY_SPEEDUP: Decimal = dec!(0.05);
const VOLATILITY_SLOWDOWN: Decimal = dec!(0.01);

/// Nightly optimizer fire hour (UTC).
const OPTIMIZER_HOUR_UTC: u32 = 2;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct SchedulerConfig {
    pub portfolio_interval: Duration,
    pub price_interval: Duration,
    pub tick_interval: Duration,
    pub database_url: String,
}

pub struct Scheduler {
    pub portfolio: PortfolioService,
    pub tick: Arc<TickService>,
    pub workflow: Arc<ApprovalWorkflow>,
    pub optimizer: Arc<NightlyOptimizer>,
    pub risk: RiskStateManager,
    pub stores: Stores,
    pub bus: EventBus,
    pub config: SchedulerConfig,
}

impl Scheduler {
    /// Spawn every background job; returns their handles for the drain.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self).portfolio_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).price_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).tick_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).expiry_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).optimizer_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).reconnect_job(shutdown.clone())),
            tokio::spawn(Arc::clone(&self).health_job(shutdown)),
        ]
    }

    /// Sleep for `period` or return true when shutdown fires first.
    async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => false,
            _ = shutdown.changed() => true,
        }
    }

    async fn portfolio_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        // Bootstrap immediately so the rules engine has a snapshot.
        let _ = self.portfolio.refresh_portfolio("bootstrap").await;

        let mut interval = self.config.portfolio_interval;
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, interval).await {
                break;
            }
            let _ = self.portfolio.refresh_portfolio("scheduled").await;

            // Adapt cadence: volatile markets poll faster, quiet ones slower.
            match self.portfolio.realized_volatility().await {
                Some(vol) if vol > VOLATILITY_SPEEDUP => {
                    interval = (interval / 2).max(PORTFOLIO_INTERVAL_FLOOR);
                    debug!(?interval, %vol, "portfolio cadence halved");
                }
                Some(vol) if vol < VOLATILITY_SLOWDOWN => {
                    interval = (interval * 2).min(PORTFOLIO_INTERVAL_CEILING);
                    debug!(?interval, %vol, "portfolio cadence doubled");
                }
                _ => {}
            }
        }
        info!("portfolio job stopped");
    }

    async fn price_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, self.config.price_interval).await {
                break;
            }
            let _ = self.portfolio.refresh_prices().await;
        }
        info!("price job stopped");
    }

    async fn tick_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, self.config.tick_interval).await {
                break;
            }
            if let Err(err) = self.tick.run_tick(false).await {
                warn!(error = %err, "rules tick failed");
            }
            if let Err(err) = self.risk.persist().await {
                warn!(error = %err, "risk state persist failed");
            }
        }
        info!("tick job stopped");
    }

    async fn expiry_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, EXPIRY_SWEEP_INTERVAL).await {
                break;
            }
            if let Err(err) = self.workflow.expire_sweep().await {
                warn!(error = %err, "expiry sweep failed");
            }
        }
    }

    async fn optimizer_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let wait = until_next_utc_hour(OPTIMIZER_HOUR_UTC);
            debug!(?wait, "optimizer sleeping until 02:00 UTC");
            if Self::sleep_or_shutdown(&mut shutdown, wait).await {
                break;
            }
            match self.optimizer.run().await {
                Ok(proposals) => info!(count = proposals.len(), "nightly optimizer finished"),
                Err(err) => warn!(error = %err, "nightly optimizer failed"),
            }
        }
    }

    /// Degraded-mode reconnector: try the database every 30s and swap the
    /// stores back to durable when it answers.
    async fn reconnect_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, RECONNECT_INTERVAL).await {
                break;
            }
            if self.stores.is_durable() {
                continue;
            }
            match Database::new(&self.config.database_url).await {
                Ok(database) => {
                    self.stores.attach_database(database).await;
                    info!("durable store recovered; leaving degraded mode");
                }
                Err(err) => debug!(error = %err, "store still unavailable"),
            }
        }
    }

    async fn health_job(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if Self::sleep_or_shutdown(&mut shutdown, HEALTH_INTERVAL).await {
                break;
            }
            self.bus.publish(BusEvent::new(
                EventKind::SystemHealth,
                json!({
                    "durableStore": self.stores.is_durable(),
                    "subscribers": self.bus.subscriber_count(),
                    "breakerTripped": self.risk.is_tripped(),
                }),
            ));
        }
    }
}

/// Duration until the next occurrence of `hour`:00 UTC.
fn until_next_utc_hour(hour: u32) -> Duration {
    let now = Utc::now();
    let mut next = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("valid hour")
        .and_utc();
    if next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_until_next_hour_is_bounded() {
        let wait = until_next_utc_hour(2);
        assert!(wait <= Duration::from_secs(24 * 3600));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn test_interval_bounds() {
        // Halving from the floor stays at the floor.
        let halved = (PORTFOLIO_INTERVAL_FLOOR / 2).max(PORTFOLIO_INTERVAL_FLOOR);
        assert_eq!(halved, PORTFOLIO_INTERVAL_FLOOR);

        let doubled = (PORTFOLIO_INTERVAL_CEILING * 2).min(PORTFOLIO_INTERVAL_CEILING);
        assert_eq!(doubled, PORTFOLIO_INTERVAL_CEILING);
    }
}
