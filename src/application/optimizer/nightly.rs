//! The nightly parameter optimizer.
//!
//! For every enabled rule it perturbs the numeric parameters within
//! bounded ranges (seeded, so a rerun reproduces the same candidates),
//! backtests each variant over the configured window, and proposes the
//! winners through the approval workflow. Nothing is ever applied
//! without a decision.

use anyhow::Result;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::application::approval_workflow::ApprovalWorkflow;
use crate::application::optimizer::backtester::{self, BacktestConfig, BacktestMetrics};
use crate::application::stores::Stores;
use crate::domain::approvals::{ApprovalAction, ApprovalSource};
use crate::domain::events::{AlertKind, BusEvent, Severity};
use crate::domain::rules::dsl::{Comparator, Condition, Rule, RuleAction};
use crate::domain::rules::metrics::RuleMetrics;
use crate::infrastructure::event_bus::EventBus;

/// A candidate must beat the baseline score by this fraction.
const IMPROVEMENT_THRESHOLD: f64 = 0.10;

/// Variants generated per rule per night.
const CANDIDATES_PER_RULE: usize = 8;

/// Multiplicative perturbation steps applied to numeric parameters.
const PERTURBATION_STEPS: [f64; 4] = [0.8, 0.9, 1.1, 1.2];

#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub rule_id: i64,
    pub rule_name: String,
    pub baseline_score: f64,
    pub candidate_score: f64,
    pub metrics: BacktestMetrics,
}

/// Composite ranking: reward risk-adjusted return, punish drawdown.
pub fn composite_score(metrics: &BacktestMetrics) -> f64 {
    0.5 * metrics.sharpe - 0.3 * metrics.max_drawdown + 0.2 * metrics.win_rate
}

pub struct NightlyOptimizer {
    stores: Stores,
    bus: EventBus,
    workflow: Arc<ApprovalWorkflow>,
    window_days: i64,
    seed: u64,
}

impl NightlyOptimizer {
    pub fn new(
        stores: Stores,
        bus: EventBus,
        workflow: Arc<ApprovalWorkflow>,
        window_days: i64,
        seed: u64,
    ) -> Self {
        Self {
            stores,
            bus,
            workflow,
            window_days,
            seed,
        }
    }

    pub async fn run(&self) -> Result<Vec<CandidateOutcome>> {
        let set = self.stores.set().await;
        let now = Utc::now();
        let window_start = now - Duration::days(self.window_days);
        let snapshots = set.snapshots.range(window_start, now).await?;

        if snapshots.len() < 2 {
            info!("optimizer skipped: not enough snapshot history");
            return Ok(vec![]);
        }

        let config = BacktestConfig::default();
        let mut proposals = Vec::new();

        for rule in set.rules.list().await?.into_iter().filter(|r| r.enabled) {
            let baseline_metrics = backtester::run(&rule, &snapshots, &config);
            let baseline_score = composite_score(&baseline_metrics);

            set.rule_metrics
                .append(&RuleMetrics {
                    rule_id: rule.id,
                    rule_version: rule.version,
                    window_start,
                    window_end: now,
                    trades: baseline_metrics.trades,
                    win_rate: baseline_metrics.win_rate,
                    sharpe: baseline_metrics.sharpe,
                    max_drawdown: baseline_metrics.max_drawdown,
                    total_return_pct: baseline_metrics.total_return_pct,
                    created_at: now,
                })
                .await?;

            // Per-rule seed keeps candidate streams independent of rule
            // ordering and of each other.
            let mut rng = StdRng::seed_from_u64(self.seed ^ (rule.id as u64));
            let mut best: Option<(Rule, BacktestMetrics, f64)> = None;

            for _ in 0..CANDIDATES_PER_RULE {
                let candidate = perturb_rule(&rule, &mut rng);
                if candidate.validate().is_err() {
                    continue;
                }
                let metrics = backtester::run(&candidate, &snapshots, &config);
                let score = composite_score(&metrics);
                if best.as_ref().is_none_or(|(_, _, s)| score > *s) {
                    best = Some((candidate, metrics, score));
                }
            }

            let Some((candidate, metrics, score)) = best else {
                continue;
            };
            let hurdle = baseline_score + IMPROVEMENT_THRESHOLD * baseline_score.abs().max(0.01);
            if score < hurdle {
                continue;
            }

            let summary = json!({
                "baseline": { "score": baseline_score, "metrics": baseline_metrics },
                "candidate": { "score": score, "metrics": metrics },
                "windowDays": self.window_days,
            });
            self.workflow
                .submit_external(
                    ApprovalSource::Optimizer,
                    ApprovalAction::RuleUpdate {
                        rule_id: rule.id,
                        rule_version: rule.version,
                        diff: serde_json::to_value(&candidate)?,
                        backtest_summary: summary,
                    },
                    format!(
                        "optimizer: '{}' score {:.4} -> {:.4} over {}d",
                        rule.name, baseline_score, score, self.window_days
                    ),
                )
                .await?;

            proposals.push(CandidateOutcome {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                baseline_score,
                candidate_score: score,
                metrics,
            });
        }

        proposals.sort_by(|a, b| {
            b.candidate_score
                .partial_cmp(&a.candidate_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top: Vec<_> = proposals
            .iter()
            .take(3)
            .map(|p| {
                json!({
                    "ruleId": p.rule_id,
                    "rule": p.rule_name,
                    "baselineScore": p.baseline_score,
                    "candidateScore": p.candidate_score,
                })
            })
            .collect();
        self.bus.publish(BusEvent::alert_with(
            AlertKind::Optimization,
            Severity::Info,
            format!("optimizer proposed {} update(s)", proposals.len()),
            json!(top),
        ));

        Ok(proposals)
    }
}

/// Scale a decimal by one of the bounded perturbation steps.
fn nudge(value: Decimal, rng: &mut StdRng) -> Decimal {
    let step = PERTURBATION_STEPS[rng.random_range(0..PERTURBATION_STEPS.len())];
    let factor = Decimal::from_f64(step).unwrap_or(Decimal::ONE);
    value * factor
}

/// Produce a variant with perturbed numeric parameters. Allocation
/// percentages are clamped back into (0, 1].
fn perturb_rule(rule: &Rule, rng: &mut StdRng) -> Rule {
    let mut candidate = rule.clone();

    for condition in &mut candidate.conditions {
        match condition {
            Condition::PriceChangePct { window_mins, cmp, .. } => {
                *window_mins = ((*window_mins as f64)
                    * PERTURBATION_STEPS[rng.random_range(0..PERTURBATION_STEPS.len())])
                    as i64;
                *window_mins = (*window_mins).max(1);
                nudge_comparator(cmp, rng);
            }
            Condition::Indicator { params, cmp, .. } => {
                if let Some(period) = params.period {
                    let scaled = ((period as f64)
                        * PERTURBATION_STEPS[rng.random_range(0..PERTURBATION_STEPS.len())])
                        as u32;
                    params.period = Some(scaled.max(2));
                }
                nudge_comparator(cmp, rng);
            }
            Condition::Balance { cmp, .. } | Condition::PortfolioValueUsd { cmp } => {
                nudge_comparator(cmp, rng);
            }
            Condition::AboveBaseline { min_pct, .. } => {
                *min_pct = nudge(*min_pct, rng);
            }
            Condition::Custom { .. } => {}
        }
    }

    for action in &mut candidate.actions {
        match action {
            RuleAction::Enter { allocation_pct, .. }
            | RuleAction::Exit { allocation_pct, .. } => {
                *allocation_pct = nudge(*allocation_pct, rng)
                    .min(Decimal::ONE)
                    .max(Decimal::new(1, 2));
            }
            _ => {}
        }
    }

    candidate.risk.max_position_pct = nudge(candidate.risk.max_position_pct, rng).min(Decimal::ONE);
    candidate.risk.cooldown_secs = ((candidate.risk.cooldown_secs as f64)
        * PERTURBATION_STEPS[rng.random_range(0..PERTURBATION_STEPS.len())])
        as u64;

    candidate
}

fn nudge_comparator(cmp: &mut Comparator, rng: &mut StdRng) {
    if let Some(gt) = cmp.gt {
        cmp.gt = Some(nudge(gt, rng));
    }
    if let Some(lt) = cmp.lt {
        cmp.lt = Some(nudge(lt, rng));
    }
    if let Some([lo, hi]) = cmp.between {
        let lo = nudge(lo, rng);
        let hi = nudge(hi, rng).max(lo);
        cmp.between = Some([lo, hi]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::dsl::{RiskBlock, Trigger};
    use rust_decimal_macros::dec;

    fn rule() -> Rule {
        Rule {
            id: 3,
            version: 1,
            name: "test".to_string(),
            enabled: true,
            trigger: Trigger::Interval { every_secs: 600 },
            conditions: vec![Condition::PriceChangePct {
                symbol: "BTC".to_string(),
                window_mins: 60,
                cmp: Comparator::gt(dec!(0.05)),
            }],
            actions: vec![RuleAction::Exit {
                symbol: "BTC".to_string(),
                allocation_pct: dec!(0.5),
            }],
            risk: RiskBlock {
                max_position_pct: dec!(0.25),
                cooldown_secs: 3600,
                guardrails: Default::default(),
            },
        }
    }

    #[test]
    fn test_perturbation_is_seeded() {
        let rule = rule();
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        assert_eq!(perturb_rule(&rule, &mut rng_a), perturb_rule(&rule, &mut rng_b));
    }

    #[test]
    fn test_perturbation_stays_valid() {
        let rule = rule();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let candidate = perturb_rule(&rule, &mut rng);
            assert!(candidate.validate().is_ok());
        }
    }

    #[test]
    fn test_composite_score_weights() {
        let metrics = BacktestMetrics {
            total_return_pct: 0.0,
            sharpe: 1.0,
            max_drawdown: 0.5,
            win_rate: 0.6,
            trades: 10,
            initial_equity: 0.0,
            final_equity: 0.0,
        };
        let score = composite_score(&metrics);
        assert!((score - (0.5 - 0.15 + 0.12)).abs() < 1e-9);
    }
}
