//! The durable-store bundle.
//!
//! Stores are the single source of truth for durable state. The bundle
//! can be backed by SQLite or entirely in-memory; degraded mode starts on
//! the in-memory set (serving last-known reads) and swaps to SQLite when
//! the reconnector brings the database back. Mutating API endpoints check
//! `is_durable` and answer 503 while degraded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::repositories::{
    AlertRepository, ApprovalRepository, BaselineRepository, CollateralRepository,
    ExecutionRepository, KillSwitchRepository, LotRepository, ObjectivesRepository,
    PriceRepository, RiskStateRepository, RuleMetricsRepository, RuleRepository,
    SnapshotRepository,
};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories as sqlite;
use crate::infrastructure::repositories as memory;

/// One coherent set of repository handles.
pub struct StoreSet {
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub prices: Arc<dyn PriceRepository>,
    pub collateral: Arc<dyn CollateralRepository>,
    pub baselines: Arc<dyn BaselineRepository>,
    pub objectives: Arc<dyn ObjectivesRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub risk_state: Arc<dyn RiskStateRepository>,
    pub kill_switch: Arc<dyn KillSwitchRepository>,
    pub rule_metrics: Arc<dyn RuleMetricsRepository>,
    pub lots: Arc<dyn LotRepository>,
    pub alerts: Arc<dyn AlertRepository>,
}

impl StoreSet {
    pub fn sqlite(database: Database) -> Self {
        Self {
            snapshots: Arc::new(sqlite::SqliteSnapshotRepository::new(database.clone())),
            prices: Arc::new(sqlite::SqlitePriceRepository::new(database.clone())),
            collateral: Arc::new(sqlite::SqliteCollateralRepository::new(database.clone())),
            baselines: Arc::new(sqlite::SqliteBaselineRepository::new(database.clone())),
            objectives: Arc::new(sqlite::SqliteObjectivesRepository::new(database.clone())),
            rules: Arc::new(sqlite::SqliteRuleRepository::new(database.clone())),
            approvals: Arc::new(sqlite::SqliteApprovalRepository::new(database.clone())),
            executions: Arc::new(sqlite::SqliteExecutionRepository::new(database.clone())),
            risk_state: Arc::new(sqlite::SqliteRiskStateRepository::new(database.clone())),
            kill_switch: Arc::new(sqlite::SqliteKillSwitchRepository::new(database.clone())),
            rule_metrics: Arc::new(sqlite::SqliteRuleMetricsRepository::new(database.clone())),
            lots: Arc::new(sqlite::SqliteLotRepository::new(database.clone())),
            alerts: Arc::new(sqlite::SqliteAlertRepository::new(database)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            snapshots: Arc::new(memory::InMemorySnapshotRepository::new()),
            prices: Arc::new(memory::InMemoryPriceRepository::new()),
            collateral: Arc::new(memory::InMemoryCollateralRepository::new()),
            baselines: Arc::new(memory::InMemoryBaselineRepository::new()),
            objectives: Arc::new(memory::InMemoryObjectivesRepository::new()),
            rules: Arc::new(memory::InMemoryRuleRepository::new()),
            approvals: Arc::new(memory::InMemoryApprovalRepository::new()),
            executions: Arc::new(memory::InMemoryExecutionRepository::new()),
            risk_state: Arc::new(memory::InMemoryRiskStateRepository::new()),
            kill_switch: Arc::new(memory::InMemoryKillSwitchRepository::new()),
            rule_metrics: Arc::new(memory::InMemoryRuleMetricsRepository::new()),
            lots: Arc::new(memory::InMemoryLotRepository::new()),
            alerts: Arc::new(memory::InMemoryAlertRepository::new()),
        }
    }
}

#[derive(Clone)]
pub struct Stores {
    current: Arc<RwLock<Arc<StoreSet>>>,
    durable: Arc<AtomicBool>,
}

impl Stores {
    pub fn durable(database: Database) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(StoreSet::sqlite(database)))),
            durable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Degraded startup: reads work off memory, mutations are refused
    /// until the reconnector attaches a database.
    pub fn degraded() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(StoreSet::in_memory()))),
            durable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// In-memory but treated as durable; the test configuration.
    pub fn ephemeral() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(StoreSet::in_memory()))),
            durable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The current coherent set. Hold the returned Arc for one logical
    /// operation; re-fetch rather than cache it.
    pub async fn set(&self) -> Arc<StoreSet> {
        self.current.read().await.clone()
    }

    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::SeqCst)
    }

    /// Swap in a recovered database and leave degraded mode.
    pub async fn attach_database(&self, database: Database) {
        let mut guard = self.current.write().await;
        *guard = Arc::new(StoreSet::sqlite(database));
        self.durable.store(true, Ordering::SeqCst);
    }
}
