//! The approval workflow.
//!
//! Accepted intents become durable approval records here. Core-asset
//! intents inside policy bounds auto-approve and go straight to the
//! executor; everything else waits for the owner. High-value
//! auto-executions are additionally gated behind a one-time code.

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::executor::TradeExecutor;
use crate::application::risk_manager::RiskStateManager;
use crate::application::stores::Stores;
use crate::domain::approvals::{
    Approval, ApprovalAction, ApprovalSource, ApprovalStatus, MfaChallenge,
};
use crate::domain::errors::ApprovalError;
use crate::domain::events::{BusEvent, EventKind};
use crate::domain::intent::TradeIntent;
use crate::infrastructure::event_bus::EventBus;

#[derive(Clone)]
pub struct WorkflowPolicy {
    /// Auto-executions at or above this USD size need MFA.
    pub mfa_threshold_usd: Decimal,
    /// Unset owner forces dry-run and disables MFA issuance.
    pub owner_configured: bool,
}

pub struct ApprovalWorkflow {
    stores: Stores,
    bus: EventBus,
    executor: Arc<TradeExecutor>,
    risk: RiskStateManager,
    policy: WorkflowPolicy,
    /// Per-approval execution guard against double submission.
    in_flight: Mutex<HashSet<Uuid>>,
}

impl ApprovalWorkflow {
    pub fn new(
        stores: Stores,
        bus: EventBus,
        executor: Arc<TradeExecutor>,
        risk: RiskStateManager,
        policy: WorkflowPolicy,
    ) -> Self {
        Self {
            stores,
            bus,
            executor,
            risk,
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Persist an accepted intent and route it: auto-execute when policy
    /// permits, otherwise queue for the owner.
    pub async fn submit_intent(self: &Arc<Self>, intent: &TradeIntent) -> Result<Approval> {
        let set = self.stores.set().await;
        let objectives = set.objectives.load().await?.unwrap_or_default();

        let value_usd = intent.value_usd();
        let mut approval = Approval::new(
            ApprovalSource::Rule,
            ApprovalAction::Trade {
                symbol: intent.symbol.clone(),
                side: intent.side,
                quantity: intent.quantity,
                price: intent.price,
                value_usd,
                dry_run: intent.dry_run,
            },
            intent.reason.clone(),
        );
        approval.rule_id = Some(intent.rule_id);
        approval.rule_version = Some(intent.rule_version);

        let known_assets: Vec<String> = set
            .snapshots
            .latest()
            .await?
            .map(|s| s.balances.keys().cloned().collect())
            .unwrap_or_default();

        let auto = objectives.auto_execute_enabled(&intent.symbol)
            && !objectives.is_new_coin(&intent.symbol, &known_assets)
            && value_usd <= objectives.approvals_required.large_trade_usd;

        if auto {
            let needs_mfa = self.policy.owner_configured
                && self.policy.mfa_threshold_usd > Decimal::ZERO
                && value_usd >= self.policy.mfa_threshold_usd;

            if needs_mfa {
                approval.mfa = Some(MfaChallenge::new(generate_otp(), Utc::now()));
                set.approvals.save(&approval).await?;
                self.publish_created(&approval, true);
                info!(id = %approval.id, "auto-executable approval awaiting MFA");
                return Ok(approval);
            }

            approval.transition(ApprovalStatus::Approved, Some("policy:auto"))?;
            self.risk
                .reserve(approval.id, &intent.symbol, intent.quantity);
            set.approvals.save(&approval).await?;
            self.publish_created(&approval, false);
            self.spawn_execution(approval.clone());
            return Ok(approval);
        }

        set.approvals.save(&approval).await?;
        self.publish_created(&approval, false);
        Ok(approval)
    }

    /// Queue an externally built approval (integrations, optimizer).
    pub async fn submit_external(
        &self,
        source: ApprovalSource,
        action: ApprovalAction,
        reason: String,
    ) -> Result<Approval> {
        let approval = Approval::new(source, action, reason);
        let set = self.stores.set().await;
        set.approvals.save(&approval).await?;
        self.publish_created(&approval, false);
        Ok(approval)
    }

    /// Owner decision on a pending approval. The HTTP layer has already
    /// authenticated the owner; `acted_by` is recorded for the audit
    /// trail.
    pub async fn decide(
        self: &Arc<Self>,
        id: Uuid,
        target: ApprovalStatus,
        acted_by: &str,
    ) -> Result<Approval, ApprovalError> {
        let set = self.stores.set().await;
        let mut approval = set
            .approvals
            .get(id)
            .await
            .map_err(|_| ApprovalError::NotFound(id.to_string()))?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        approval.transition(target, Some(acted_by))?;
        if target == ApprovalStatus::Approved
            && let ApprovalAction::Trade {
                symbol, quantity, ..
            } = &approval.action
        {
            self.risk.reserve(approval.id, symbol, *quantity);
        }

        set.approvals
            .save(&approval)
            .await
            .map_err(|_| ApprovalError::NotFound(id.to_string()))?;
        self.publish_updated(&approval);

        if approval.status == ApprovalStatus::Approved {
            match &approval.action {
                ApprovalAction::Trade { .. } => self.spawn_execution(approval.clone()),
                ApprovalAction::RuleUpdate { .. } => {
                    if let Err(err) = self.apply_rule_update(&mut approval).await {
                        warn!(id = %approval.id, error = %err, "rule update failed");
                    }
                }
            }
        }
        Ok(approval)
    }

    /// Verify the one-time code; success auto-approves and executes.
    pub async fn verify_mfa(
        self: &Arc<Self>,
        id: Uuid,
        code: &str,
    ) -> Result<Approval, ApprovalError> {
        let set = self.stores.set().await;
        let mut approval = set
            .approvals
            .get(id)
            .await
            .map_err(|_| ApprovalError::NotFound(id.to_string()))?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        let challenge = approval.mfa.as_mut().ok_or(ApprovalError::MfaRejected)?;
        challenge.verify(code, Utc::now())?;

        approval.transition(ApprovalStatus::Approved, Some("policy:auto+mfa"))?;
        if let ApprovalAction::Trade {
            symbol, quantity, ..
        } = &approval.action
        {
            self.risk.reserve(approval.id, symbol, *quantity);
        }
        set.approvals
            .save(&approval)
            .await
            .map_err(|_| ApprovalError::NotFound(id.to_string()))?;
        self.publish_updated(&approval);
        self.spawn_execution(approval.clone());
        Ok(approval)
    }

    /// TTL sweep: pending and deferred approvals past their expiry.
    pub async fn expire_sweep(&self) -> Result<usize> {
        let set = self.stores.set().await;
        let now = Utc::now();
        let mut expired = 0;

        for status in [ApprovalStatus::Pending, ApprovalStatus::Deferred] {
            for mut approval in set.approvals.by_status(status).await? {
                if now > approval.expires_at {
                    approval.transition(ApprovalStatus::Expired, None)?;
                    set.approvals.save(&approval).await?;
                    self.publish_updated(&approval);
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            info!(expired, "approvals expired by TTL sweep");
        }
        Ok(expired)
    }

    /// Kill-switch enabled: park approved-but-unexecuted approvals.
    pub async fn defer_unexecuted(&self) -> Result<usize> {
        let set = self.stores.set().await;
        let mut deferred = 0;
        for mut approval in set.approvals.by_status(ApprovalStatus::Approved).await? {
            approval.transition(ApprovalStatus::Deferred, None)?;
            set.approvals.save(&approval).await?;
            self.publish_updated(&approval);
            deferred += 1;
        }
        Ok(deferred)
    }

    /// Kill-switch disabled: resume whatever was parked.
    pub async fn resume_deferred(self: &Arc<Self>) -> Result<usize> {
        let set = self.stores.set().await;
        let mut resumed = 0;
        for mut approval in set.approvals.by_status(ApprovalStatus::Deferred).await? {
            approval.transition(ApprovalStatus::Approved, Some("policy:resume"))?;
            set.approvals.save(&approval).await?;
            self.publish_updated(&approval);
            if matches!(approval.action, ApprovalAction::Trade { .. }) {
                self.spawn_execution(approval.clone());
            }
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn apply_rule_update(&self, approval: &mut Approval) -> Result<()> {
        let ApprovalAction::RuleUpdate { rule_id, diff, .. } = &approval.action else {
            return Ok(());
        };
        let set = self.stores.set().await;
        let mut rule = crate::domain::rules::dsl::Rule::from_json(&diff.to_string())?;
        let current = set
            .rules
            .get(*rule_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("rule {rule_id} vanished"))?;
        rule.id = current.id;
        rule.version = current.version + 1;
        set.rules.save_version(&rule).await?;

        approval.transition(ApprovalStatus::Executed, None)?;
        set.approvals.save(approval).await?;
        self.publish_updated(approval);
        info!(rule_id = rule.id, version = rule.version, "optimizer proposal applied");
        Ok(())
    }

    /// Run the executor on its own task, serialized per approval id.
    fn spawn_execution(self: &Arc<Self>, mut approval: Approval) {
        {
            let mut guard = self.in_flight.lock().unwrap();
            if !guard.insert(approval.id) {
                warn!(id = %approval.id, "execution already in flight; skipping");
                return;
            }
        }

        let workflow = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = workflow.executor.execute(&mut approval).await {
                warn!(id = %approval.id, error = %err, "execution task failed");
            }
            workflow.in_flight.lock().unwrap().remove(&approval.id);
        });
    }

    /// Execute synchronously (tests and the manual evaluate endpoint).
    pub async fn execute_now(&self, approval: &mut Approval) -> Result<()> {
        self.executor.execute(approval).await.map(|_| ())
    }

    fn publish_created(&self, approval: &Approval, mfa_required: bool) {
        self.bus.publish(BusEvent::new(
            EventKind::ApprovalCreated,
            json!({
                "id": approval.id,
                "source": approval.source,
                "status": approval.status,
                "reason": approval.reason,
                "mfaRequired": mfa_required,
            }),
        ));
    }

    fn publish_updated(&self, approval: &Approval) {
        self.bus.publish(BusEvent::new(
            EventKind::ApprovalUpdated,
            json!({ "id": approval.id, "status": approval.status }),
        ));
    }
}

fn generate_otp() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{code:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::portfolio_service::PortfolioService;
    use crate::application::tick_service::TriggerQueue;
    use crate::domain::objectives::Objectives;
    use crate::domain::types::{OrderSide, Snapshot};
    use crate::infrastructure::exchange::MockExchange;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    async fn workflow(mfa_threshold: Decimal) -> (Arc<ApprovalWorkflow>, Stores) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("BTC", dec!(2)).await;
        exchange.set_price("BTC", dec!(70000)).await;

        let stores = Stores::ephemeral();
        let bus = EventBus::new();
        let risk = RiskStateManager::new(stores.clone(), dec!(500));
        let portfolio = PortfolioService::new(
            exchange.clone(),
            stores.clone(),
            bus.clone(),
            TriggerQueue::new(),
        );
        let executor = Arc::new(
            TradeExecutor::new(
                exchange,
                stores.clone(),
                bus.clone(),
                risk.clone(),
                portfolio,
            )
            .with_backoff(vec![std::time::Duration::from_millis(1); 3]),
        );
        let workflow = Arc::new(ApprovalWorkflow::new(
            stores.clone(),
            bus,
            executor,
            risk,
            WorkflowPolicy {
                mfa_threshold_usd: mfa_threshold,
                owner_configured: true,
            },
        ));
        (workflow, stores)
    }

    fn intent(symbol: &str, quantity: Decimal, dry_run: bool) -> TradeIntent {
        TradeIntent {
            rule_id: 1,
            rule_version: 1,
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            quantity,
            price: dec!(70000),
            reason: "take profit".to_string(),
            dry_run,
            collateral: vec![],
            created_at: Utc::now(),
        }
    }

    async fn enable_auto_execute(stores: &Stores) {
        let set = stores.set().await;
        let mut objectives = Objectives::default();
        objectives.core_assets.get_mut("BTC").unwrap().auto_execute = true;
        objectives.approvals_required.large_trade_usd = dec!(50000);
        set.objectives.save(&objectives).await.unwrap();

        // A known snapshot so BTC is not a "new coin".
        let mut balances = HashMap::new();
        balances.insert("BTC".to_string(), dec!(2));
        let snapshot = Snapshot::new(balances, HashMap::new(), "seed", Utc::now());
        set.snapshots.save(&snapshot).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_core_intent_stays_pending() {
        let (workflow, _stores) = workflow(Decimal::ZERO).await;
        let approval = workflow
            .submit_intent(&intent("DOGE", dec!(100), true))
            .await
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_auto_execute_within_policy() {
        let (workflow, stores) = workflow(Decimal::ZERO).await;
        enable_auto_execute(&stores).await;

        let approval = workflow
            .submit_intent(&intent("BTC", dec!(0.5), true))
            .await
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_large_trade_requires_human() {
        let (workflow, stores) = workflow(Decimal::ZERO).await;
        enable_auto_execute(&stores).await;
        let set = stores.set().await;
        let mut objectives = set.objectives.load().await.unwrap().unwrap();
        objectives.approvals_required.large_trade_usd = dec!(1000);
        set.objectives.save(&objectives).await.unwrap();

        // 0.5 BTC = $35k > $1k threshold.
        let approval = workflow
            .submit_intent(&intent("BTC", dec!(0.5), true))
            .await
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_mfa_gate_over_threshold() {
        let (workflow, stores) = workflow(dec!(10000)).await;
        enable_auto_execute(&stores).await;

        // 0.5 BTC = $35k >= $10k threshold: challenge issued, stays pending.
        let approval = workflow
            .submit_intent(&intent("BTC", dec!(0.5), true))
            .await
            .unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);
        let code = approval.mfa.as_ref().unwrap().code.clone();
        assert_eq!(code.len(), 6);

        // Wrong code is rejected.
        let wrong = if code == "000000" { "000001" } else { "000000" };
        assert!(workflow.verify_mfa(approval.id, wrong).await.is_err());

        // Right code approves and executes.
        let verified = workflow.verify_mfa(approval.id, &code).await.unwrap();
        assert_eq!(verified.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_owner_decline_is_terminal() {
        let (workflow, stores) = workflow(Decimal::ZERO).await;
        let approval = workflow
            .submit_intent(&intent("DOGE", dec!(100), true))
            .await
            .unwrap();

        let declined = workflow
            .decide(approval.id, ApprovalStatus::Declined, "owner")
            .await
            .unwrap();
        assert_eq!(declined.status, ApprovalStatus::Declined);
        assert_eq!(declined.acted_by.as_deref(), Some("owner"));

        let err = workflow
            .decide(approval.id, ApprovalStatus::Approved, "owner")
            .await;
        assert!(err.is_err());
        let _ = stores;
    }

    #[tokio::test]
    async fn test_defer_and_resume_cycle() {
        let (workflow, stores) = workflow(Decimal::ZERO).await;
        let approval = workflow
            .submit_intent(&intent("DOGE", dec!(100), true))
            .await
            .unwrap();

        // Owner approves, then the kill-switch defers it before execution.
        let set = stores.set().await;
        let mut stored = set.approvals.get(approval.id).await.unwrap().unwrap();
        stored
            .transition(ApprovalStatus::Approved, Some("owner"))
            .unwrap();
        set.approvals.save(&stored).await.unwrap();

        assert_eq!(workflow.defer_unexecuted().await.unwrap(), 1);
        let deferred = set.approvals.get(approval.id).await.unwrap().unwrap();
        assert_eq!(deferred.status, ApprovalStatus::Deferred);

        assert_eq!(workflow.resume_deferred().await.unwrap(), 1);
        let resumed = set.approvals.get(approval.id).await.unwrap().unwrap();
        assert!(matches!(
            resumed.status,
            ApprovalStatus::Approved | ApprovalStatus::Executed | ApprovalStatus::Declined
        ));
    }

    #[tokio::test]
    async fn test_expire_sweep() {
        let (workflow, stores) = workflow(Decimal::ZERO).await;
        let approval = workflow
            .submit_intent(&intent("DOGE", dec!(100), true))
            .await
            .unwrap();

        let set = stores.set().await;
        let mut stored = set.approvals.get(approval.id).await.unwrap().unwrap();
        stored.expires_at = Utc::now() - chrono::Duration::hours(1);
        set.approvals.save(&stored).await.unwrap();

        assert_eq!(workflow.expire_sweep().await.unwrap(), 1);
        let expired = set.approvals.get(approval.id).await.unwrap().unwrap();
        assert_eq!(expired.status, ApprovalStatus::Expired);
    }
}
