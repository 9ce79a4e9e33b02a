//! Repository abstractions over durable state.
//!
//! One trait per aggregate; SQLite implementations live under
//! `infrastructure::persistence` and in-memory implementations (used by
//! tests and by degraded mode) under `infrastructure::repositories`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::approvals::{Approval, ApprovalStatus, Execution};
use crate::domain::events::AlertRecord;
use crate::domain::lots::LotBook;
use crate::domain::objectives::Objectives;
use crate::domain::risk::state::RiskState;
use crate::domain::rules::dsl::Rule;
use crate::domain::rules::metrics::RuleMetrics;
use crate::domain::types::{Baseline, CollateralRecord, KillSwitch, PricePoint, Snapshot};

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
    async fn latest(&self) -> Result<Option<Snapshot>>;
    /// Newest snapshot with `timestamp <= at`.
    async fn latest_before(&self, at: DateTime<Utc>) -> Result<Option<Snapshot>>;
    async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Snapshot>>;
    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait PriceRepository: Send + Sync {
    async fn append(&self, points: &[PricePoint]) -> Result<()>;
    /// Points for one symbol since `since`, ascending by time.
    async fn series(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<PricePoint>>;
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait CollateralRepository: Send + Sync {
    /// Replace the whole record set (never additive). Bumps the version
    /// counter that guards concurrent readers.
    async fn replace_all(&self, records: &[CollateralRecord]) -> Result<()>;
    async fn all(&self) -> Result<(u64, Vec<CollateralRecord>)>;
}

#[async_trait]
pub trait BaselineRepository: Send + Sync {
    async fn get(&self, asset: &str) -> Result<Option<Baseline>>;
    async fn all(&self) -> Result<Vec<Baseline>>;
    async fn upsert(&self, baseline: &Baseline) -> Result<()>;
}

#[async_trait]
pub trait ObjectivesRepository: Send + Sync {
    async fn load(&self) -> Result<Option<Objectives>>;
    async fn save(&self, objectives: &Objectives) -> Result<()>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Insert version 1 of a new rule; returns it with the assigned id.
    async fn create(&self, rule: &Rule) -> Result<Rule>;
    /// Persist an edited rule as a new version; history is retained.
    async fn save_version(&self, rule: &Rule) -> Result<()>;
    /// Latest version of a rule.
    async fn get(&self, id: i64) -> Result<Option<Rule>>;
    /// Latest version of every rule.
    async fn list(&self) -> Result<Vec<Rule>>;
    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn save(&self, approval: &Approval) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Approval>>;
    async fn by_status(&self, status: ApprovalStatus) -> Result<Vec<Approval>>;
    async fn list(&self, limit: usize) -> Result<Vec<Approval>>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<()>;
    async fn recent(&self, limit: usize) -> Result<Vec<Execution>>;
    async fn by_approval(&self, approval_id: Uuid) -> Result<Vec<Execution>>;
}

#[async_trait]
pub trait RiskStateRepository: Send + Sync {
    async fn load(&self) -> Result<Option<RiskState>>;
    async fn save(&self, state: &RiskState) -> Result<()>;
}

#[async_trait]
pub trait KillSwitchRepository: Send + Sync {
    async fn load(&self) -> Result<KillSwitch>;
    async fn save(&self, state: &KillSwitch) -> Result<()>;
}

#[async_trait]
pub trait RuleMetricsRepository: Send + Sync {
    async fn append(&self, metrics: &RuleMetrics) -> Result<()>;
    async fn for_rule(&self, rule_id: i64) -> Result<Vec<RuleMetrics>>;
}

#[async_trait]
pub trait LotRepository: Send + Sync {
    async fn load(&self) -> Result<LotBook>;
    async fn save(&self, book: &LotBook) -> Result<()>;
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn save(&self, alert: &AlertRecord) -> Result<()>;
    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>>;
}
