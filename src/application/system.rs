//! Application wiring and lifecycle.
//!
//! `Application::build` assembles the whole graph leaves-first (bus,
//! stores, exchange, services) and `start` brings up the background
//! schedulers. Shutdown flips the watch channel, waits a bounded drain,
//! and persists the risk counters so a restart is lossless.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::approval_workflow::{ApprovalWorkflow, WorkflowPolicy};
use crate::application::executor::TradeExecutor;
use crate::application::optimizer::nightly::NightlyOptimizer;
use crate::application::portfolio_service::PortfolioService;
use crate::application::risk_manager::RiskStateManager;
use crate::application::scheduler::{Scheduler, SchedulerConfig};
use crate::application::stores::Stores;
use crate::application::tick_service::{TickService, TriggerQueue};
use crate::config::Config;
use crate::domain::ports::ExchangeClient;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::exchange::MockExchange;
use crate::infrastructure::persistence::database::Database;

/// Shutdown drain bound.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Application {
    pub config: Config,
    pub stores: Stores,
    pub bus: EventBus,
    pub exchange: Arc<dyn ExchangeClient>,
    pub portfolio: PortfolioService,
    pub risk: RiskStateManager,
    pub workflow: Arc<ApprovalWorkflow>,
    pub tick: Arc<TickService>,
    pub optimizer: Arc<NightlyOptimizer>,
    pub triggers: TriggerQueue,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let bus = EventBus::new();

        // Store outage at startup degrades to in-memory reads; the
        // reconnector swaps back when the database answers.
        let stores = match Database::new(&config.database_url).await {
            Ok(database) => Stores::durable(database),
            Err(err) => {
                warn!(error = %err, "database unreachable; starting degraded");
                Stores::degraded()
            }
        };

        // Live connectors are out of scope for this core; without keys
        // the deterministic mock serves, which also forces dry-run.
        let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchange::new());
        if config.exchange_configured() {
            info!("exchange credentials present; expecting external connector wiring");
        } else {
            info!("no exchange credentials; using the in-process mock");
        }

        let triggers = TriggerQueue::new();
        let portfolio = PortfolioService::new(
            Arc::clone(&exchange),
            stores.clone(),
            bus.clone(),
            triggers.clone(),
        );

        let risk = RiskStateManager::new(stores.clone(), config.daily_loss_limit_usd);
        risk.restore().await?;

        let executor = Arc::new(TradeExecutor::new(
            Arc::clone(&exchange),
            stores.clone(),
            bus.clone(),
            risk.clone(),
            portfolio.clone(),
        ));

        let workflow = Arc::new(ApprovalWorkflow::new(
            stores.clone(),
            bus.clone(),
            executor,
            risk.clone(),
            WorkflowPolicy {
                mfa_threshold_usd: config.mfa_threshold_usd,
                owner_configured: config.owner_configured(),
            },
        ));

        let tick = Arc::new(TickService::new(
            stores.clone(),
            bus.clone(),
            risk.clone(),
            Arc::clone(&workflow),
            triggers.clone(),
            config.owner_configured(),
            config.dry_run_default,
            config.min_trade_usd,
            config.daily_loss_limit_usd,
        ));

        let optimizer = Arc::new(NightlyOptimizer::new(
            stores.clone(),
            bus.clone(),
            Arc::clone(&workflow),
            config.optimizer_window_days,
            config.optimizer_seed,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            stores,
            bus,
            exchange,
            portfolio,
            risk,
            workflow,
            tick,
            optimizer,
            triggers,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Spawn background jobs. Light mode serves the API only.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.config.light_mode {
            info!("light mode: background schedulers disabled");
            return vec![];
        }
        let scheduler = Arc::new(Scheduler {
            portfolio: self.portfolio.clone(),
            tick: Arc::clone(&self.tick),
            workflow: Arc::clone(&self.workflow),
            optimizer: Arc::clone(&self.optimizer),
            risk: self.risk.clone(),
            stores: self.stores.clone(),
            bus: self.bus.clone(),
            config: SchedulerConfig {
                portfolio_interval: Duration::from_secs(self.config.snapshot_interval_mins * 60),
                price_interval: Duration::from_secs(self.config.price_interval_secs),
                tick_interval: Duration::from_secs(self.config.tick_interval_mins * 60),
                database_url: self.config.database_url.clone(),
            },
        });
        scheduler.start(self.shutdown_rx.clone())
    }

    /// Receiver for the process-wide shutdown signal.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Signal shutdown, drain within the bound, persist risk counters.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        info!("shutdown: draining background jobs");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("drain timed out; proceeding with shutdown");
        }

        if let Err(err) = self.risk.persist().await {
            warn!(error = %err, "final risk state persist failed");
        }
        info!("shutdown complete");
    }
}
