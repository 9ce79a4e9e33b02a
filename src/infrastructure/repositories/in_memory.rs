//! Thread-safe in-memory repositories.
//!
//! They back the test suite and the degraded mode that serves read
//! endpoints while the durable store is away. Semantics mirror the SQLite
//! implementations exactly.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::approvals::{Approval, ApprovalStatus, Execution};
use crate::domain::events::AlertRecord;
use crate::domain::lots::LotBook;
use crate::domain::objectives::Objectives;
use crate::domain::repositories::{
    AlertRepository, ApprovalRepository, BaselineRepository, CollateralRepository,
    ExecutionRepository, KillSwitchRepository, LotRepository, ObjectivesRepository,
    PriceRepository, RiskStateRepository, RuleMetricsRepository, RuleRepository,
    SnapshotRepository,
};
use crate::domain::risk::state::RiskState;
use crate::domain::rules::dsl::Rule;
use crate::domain::rules::metrics::RuleMetrics;
use crate::domain::types::{Baseline, CollateralRecord, KillSwitch, PricePoint, Snapshot};

#[derive(Default, Clone)]
pub struct InMemorySnapshotRepository {
    snapshots: Arc<RwLock<Vec<Snapshot>>>,
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, snapshots: Vec<Snapshot>) {
        let mut guard = self.snapshots.write().await;
        *guard = snapshots;
        guard.sort_by_key(|s| s.timestamp);
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut guard = self.snapshots.write().await;
        guard.push(snapshot.clone());
        guard.sort_by_key(|s| s.timestamp);
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().await.last().cloned())
    }

    async fn latest_before(&self, at: DateTime<Utc>) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .rev()
            .find(|s| s.timestamp <= at)
            .cloned())
    }

    async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.snapshots.read().await.len())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPriceRepository {
    points: Arc<RwLock<Vec<PricePoint>>>,
}

impl InMemoryPriceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PriceRepository for InMemoryPriceRepository {
    async fn append(&self, points: &[PricePoint]) -> Result<()> {
        let mut guard = self.points.write().await;
        guard.extend_from_slice(points);
        guard.sort_by_key(|p| p.timestamp);
        Ok(())
    }

    async fn series(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        Ok(self
            .points
            .read()
            .await
            .iter()
            .filter(|p| p.symbol == symbol && p.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<()> {
        self.points.write().await.retain(|p| p.timestamp >= cutoff);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCollateralRepository {
    state: Arc<RwLock<(u64, Vec<CollateralRecord>)>>,
}

impl InMemoryCollateralRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollateralRepository for InMemoryCollateralRepository {
    async fn replace_all(&self, records: &[CollateralRecord]) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.0 += 1;
        guard.1 = records.to_vec();
        Ok(())
    }

    async fn all(&self) -> Result<(u64, Vec<CollateralRecord>)> {
        Ok(self.state.read().await.clone())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryBaselineRepository {
    baselines: Arc<RwLock<HashMap<String, Baseline>>>,
}

impl InMemoryBaselineRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineRepository for InMemoryBaselineRepository {
    async fn get(&self, asset: &str) -> Result<Option<Baseline>> {
        Ok(self.baselines.read().await.get(asset).cloned())
    }

    async fn all(&self) -> Result<Vec<Baseline>> {
        Ok(self.baselines.read().await.values().cloned().collect())
    }

    async fn upsert(&self, baseline: &Baseline) -> Result<()> {
        self.baselines
            .write()
            .await
            .insert(baseline.asset.clone(), baseline.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryObjectivesRepository {
    objectives: Arc<RwLock<Option<Objectives>>>,
}

impl InMemoryObjectivesRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectivesRepository for InMemoryObjectivesRepository {
    async fn load(&self) -> Result<Option<Objectives>> {
        Ok(self.objectives.read().await.clone())
    }

    async fn save(&self, objectives: &Objectives) -> Result<()> {
        *self.objectives.write().await = Some(objectives.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRuleRepository {
    /// id -> all versions, ascending.
    rules: Arc<RwLock<HashMap<i64, Vec<Rule>>>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn create(&self, rule: &Rule) -> Result<Rule> {
        let mut guard = self.rules.write().await;
        let next_id = guard.keys().max().copied().unwrap_or(0) + 1;
        let mut stored = rule.clone();
        stored.id = next_id;
        stored.version = 1;
        guard.insert(next_id, vec![stored.clone()]);
        Ok(stored)
    }

    async fn save_version(&self, rule: &Rule) -> Result<()> {
        self.rules
            .write()
            .await
            .entry(rule.id)
            .or_default()
            .push(rule.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<Rule>> {
        Ok(self
            .rules
            .read()
            .await
            .get(&id)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let guard = self.rules.read().await;
        let mut latest: Vec<Rule> = guard
            .values()
            .filter_map(|versions| versions.last().cloned())
            .collect();
        latest.sort_by_key(|r| r.id);
        Ok(latest)
    }

    async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        let mut guard = self.rules.write().await;
        let versions = guard
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("rule {id} not found"))?;
        if let Some(rule) = versions.last_mut() {
            rule.enabled = enabled;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryApprovalRepository {
    approvals: Arc<RwLock<HashMap<Uuid, Approval>>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn save(&self, approval: &Approval) -> Result<()> {
        self.approvals
            .write()
            .await
            .insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Approval>> {
        Ok(self.approvals.read().await.get(&id).cloned())
    }

    async fn by_status(&self, status: ApprovalStatus) -> Result<Vec<Approval>> {
        let mut matches: Vec<Approval> = self
            .approvals
            .read()
            .await
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        matches.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(matches)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Approval>> {
        let mut all: Vec<Approval> = self.approvals.read().await.values().cloned().collect();
        all.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<Vec<Execution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<()> {
        self.executions.write().await.push(execution.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Execution>> {
        let guard = self.executions.read().await;
        let mut all: Vec<Execution> = guard.clone();
        all.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        all.truncate(limit);
        Ok(all)
    }

    async fn by_approval(&self, approval_id: Uuid) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.approval_id == approval_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRiskStateRepository {
    state: Arc<RwLock<Option<RiskState>>>,
}

impl InMemoryRiskStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStateRepository for InMemoryRiskStateRepository {
    async fn load(&self) -> Result<Option<RiskState>> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &RiskState) -> Result<()> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryKillSwitchRepository {
    state: Arc<RwLock<KillSwitch>>,
}

impl InMemoryKillSwitchRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KillSwitchRepository for InMemoryKillSwitchRepository {
    async fn load(&self) -> Result<KillSwitch> {
        Ok(self.state.read().await.clone())
    }

    async fn save(&self, state: &KillSwitch) -> Result<()> {
        *self.state.write().await = state.clone();
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRuleMetricsRepository {
    metrics: Arc<RwLock<Vec<RuleMetrics>>>,
}

impl InMemoryRuleMetricsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleMetricsRepository for InMemoryRuleMetricsRepository {
    async fn append(&self, metrics: &RuleMetrics) -> Result<()> {
        self.metrics.write().await.push(metrics.clone());
        Ok(())
    }

    async fn for_rule(&self, rule_id: i64) -> Result<Vec<RuleMetrics>> {
        Ok(self
            .metrics
            .read()
            .await
            .iter()
            .filter(|m| m.rule_id == rule_id)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryLotRepository {
    book: Arc<RwLock<LotBook>>,
}

impl InMemoryLotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LotRepository for InMemoryLotRepository {
    async fn load(&self) -> Result<LotBook> {
        Ok(self.book.read().await.clone())
    }

    async fn save(&self, book: &LotBook) -> Result<()> {
        *self.book.write().await = book.clone();
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAlertRepository {
    alerts: Arc<RwLock<Vec<AlertRecord>>>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn save(&self, alert: &AlertRecord) -> Result<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let guard = self.alerts.read().await;
        let mut all = guard.clone();
        all.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        all.truncate(limit);
        Ok(all)
    }
}
