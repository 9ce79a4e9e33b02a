//! One rules-evaluation tick, end to end.
//!
//! Gathers the evaluation context from the stores, runs the engine, pushes
//! every intent through the guardrail pipeline under the risk mutex
//! discipline, and hands survivors to the approval workflow. Ticks never
//! overlap; the scheduler serializes them.

use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::approval_workflow::ApprovalWorkflow;
use crate::application::risk_manager::RiskStateManager;
use crate::application::stores::Stores;
use crate::domain::events::{AlertKind, BusEvent, Severity};
use crate::domain::risk::guardrails::GuardrailContext;
use crate::domain::risk::pipeline::{PipelineVerdict, RiskPipeline};
use crate::domain::rules::context::EvalContext;
use crate::domain::rules::dsl::TriggerEvent;
use crate::domain::rules::engine;
use crate::domain::types::portfolio_value_usd;

/// Trigger events observed between ticks (deposits, price shocks, manual
/// kicks). Drained once per tick.
#[derive(Clone, Default)]
pub struct TriggerQueue {
    events: Arc<Mutex<Vec<TriggerEvent>>>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: TriggerEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn drain(&self) -> Vec<TriggerEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub rules_evaluated: usize,
    pub intents: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub approval_ids: Vec<Uuid>,
}

pub struct TickService {
    stores: Stores,
    bus: crate::infrastructure::event_bus::EventBus,
    risk: RiskStateManager,
    workflow: Arc<ApprovalWorkflow>,
    pipeline: RiskPipeline,
    triggers: TriggerQueue,
    last_fires: Mutex<HashMap<i64, chrono::DateTime<Utc>>>,
    owner_configured: bool,
    dry_run_default: bool,
    min_trade_usd: Decimal,
    daily_loss_limit_usd: Decimal,
}

impl TickService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stores: Stores,
        bus: crate::infrastructure::event_bus::EventBus,
        risk: RiskStateManager,
        workflow: Arc<ApprovalWorkflow>,
        triggers: TriggerQueue,
        owner_configured: bool,
        dry_run_default: bool,
        min_trade_usd: Decimal,
        daily_loss_limit_usd: Decimal,
    ) -> Self {
        Self {
            stores,
            bus,
            risk,
            workflow,
            pipeline: RiskPipeline::standard(),
            triggers,
            last_fires: Mutex::new(HashMap::new()),
            owner_configured,
            dry_run_default,
            min_trade_usd,
            daily_loss_limit_usd,
        }
    }

    /// Kick an event-rule pass on the next tick (manual trigger).
    pub fn push_manual_trigger(&self) {
        self.triggers.push(TriggerEvent::Manual);
    }

    /// Run one tick. `force_dry_run` is used by the evaluation endpoint.
    pub async fn run_tick(&self, force_dry_run: bool) -> Result<TickReport> {
        let set = self.stores.set().await;
        let now = Utc::now();

        let Some(snapshot) = set.snapshots.latest().await? else {
            debug!("tick skipped: no snapshot yet");
            return Ok(TickReport {
                rules_evaluated: 0,
                intents: 0,
                accepted: 0,
                rejected: 0,
                approval_ids: vec![],
            });
        };

        let rules = set.rules.list().await?;
        let kill_switch = set.kill_switch.load().await?.enabled;
        let objectives = set.objectives.load().await?.unwrap_or_default();
        let baselines: HashMap<String, Decimal> = set
            .baselines
            .all()
            .await?
            .into_iter()
            .map(|b| (b.asset, b.quantity))
            .collect();
        let (_version, collateral) = set.collateral.all().await?;

        let mut price_series = HashMap::new();
        for symbol in snapshot.balances.keys() {
            let series = set
                .prices
                .series(symbol, now - Duration::hours(24))
                .await?;
            price_series.insert(symbol.clone(), series);
        }

        // Dry-run is forced on when no owner identity is configured.
        let dry_run = !self.owner_configured || self.dry_run_default || force_dry_run;

        let ctx = EvalContext::new(
            now,
            snapshot.balances.clone(),
            snapshot.prices.clone(),
            price_series,
            baselines.clone(),
            objectives.clone(),
            collateral.clone(),
            self.last_fires.lock().unwrap().clone(),
            self.triggers.drain(),
            kill_switch,
            dry_run,
        );

        let rules_evaluated = rules.iter().filter(|r| r.enabled).count();
        let outcome = engine::evaluate_tick(&rules, &ctx);

        for alert in outcome.alerts {
            self.bus.publish(alert);
        }
        {
            let mut fires = self.last_fires.lock().unwrap();
            for rule_id in &outcome.fired_rules {
                fires.insert(*rule_id, now);
            }
        }

        let cost_basis: HashMap<String, Decimal> = {
            let book = set.lots.load().await?;
            snapshot
                .balances
                .keys()
                .filter_map(|asset| book.average_cost(asset).map(|c| (asset.clone(), c)))
                .collect()
        };
        let portfolio_value = portfolio_value_usd(&snapshot.balances, &snapshot.prices);

        let mut accepted = 0;
        let mut rejected = 0;
        let mut approval_ids = Vec::new();
        let intents_total = outcome.intents.len();

        for intent in outcome.intents {
            let rule = rules.iter().find(|r| r.id == intent.rule_id);
            let Some(rule) = rule else { continue };

            let risk_snapshot = self.risk.snapshot(now);
            let gctx = GuardrailContext {
                intent: &intent,
                risk_block: &rule.risk,
                balances: &snapshot.balances,
                baselines: &baselines,
                collateral: &collateral,
                cost_basis: &cost_basis,
                portfolio_value,
                risk: &risk_snapshot,
                objectives: &objectives,
                kill_switch,
                min_trade_usd: self.min_trade_usd,
                daily_loss_limit_usd: self.daily_loss_limit_usd,
                now,
            };

            match self.pipeline.evaluate(&gctx) {
                PipelineVerdict::Accepted {
                    quantity,
                    notes,
                    warnings,
                } => {
                    for warning in warnings {
                        self.bus.publish(BusEvent::alert(
                            AlertKind::LtvWarning,
                            Severity::Warning,
                            warning,
                        ));
                    }
                    let mut final_intent = intent.with_quantity(quantity);
                    if !notes.is_empty() {
                        final_intent.reason =
                            format!("{} [{}]", final_intent.reason, notes.join("; "));
                    }
                    let approval = self.workflow.submit_intent(&final_intent).await?;
                    approval_ids.push(approval.id);
                    accepted += 1;
                }
                PipelineVerdict::Rejected { chain } => {
                    rejected += 1;
                    self.bus.publish(BusEvent::alert_with(
                        AlertKind::RiskBlocked,
                        Severity::Warning,
                        format!("intent blocked: {}", chain.join(" -> ")),
                        json!({
                            "ruleId": intent.rule_id,
                            "symbol": intent.symbol,
                            "side": intent.side,
                            "quantity": intent.quantity,
                            "chain": chain,
                        }),
                    ));
                }
            }
        }

        if intents_total > 0 {
            info!(
                rules = rules_evaluated,
                intents = intents_total,
                accepted,
                rejected,
                "tick complete"
            );
        }

        Ok(TickReport {
            rules_evaluated,
            intents: intents_total,
            accepted,
            rejected,
            approval_ids,
        })
    }
}
