//! The per-tick rule evaluator.
//!
//! Pure with respect to the outside world: everything it needs arrives in
//! the `EvalContext`, and everything it decides leaves in the
//! `TickOutcome`. Rules are evaluated in ascending id order so a tick is
//! reproducible from its inputs.

use chrono::Duration;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;

use crate::domain::events::{AlertKind, BusEvent, Severity};
use crate::domain::intent::TradeIntent;
use crate::domain::rules::context::{EvalContext, IndicatorLookup, indicator_decimal};
use crate::domain::rules::dsl::{Condition, Rule, RuleAction, Trigger};
use crate::domain::rules::expr;
use crate::domain::types::OrderSide;

/// Rebalance deltas below this USD size are noise, not intents.
const REBALANCE_MIN_DELTA_USD: Decimal = Decimal::from_parts(1, 0, 0, false, 0);

#[derive(Debug, Default)]
pub struct TickOutcome {
    pub intents: Vec<TradeIntent>,
    pub alerts: Vec<BusEvent>,
    /// Rules that fired this tick; the caller advances their `last_fire`.
    pub fired_rules: Vec<i64>,
}

/// Evaluate every enabled rule against the context.
pub fn evaluate_tick(rules: &[Rule], ctx: &EvalContext) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    // Kill-switch short-circuits the whole tick before any rule runs.
    if ctx.kill_switch {
        debug!("tick skipped: kill-switch enabled");
        return outcome;
    }

    let mut ordered: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by_key(|r| r.id);

    for rule in ordered {
        if !trigger_due(rule, ctx) {
            continue;
        }

        let mut passed = Vec::with_capacity(rule.conditions.len());
        let mut all_passed = true;
        for condition in &rule.conditions {
            match check_condition(condition, ctx) {
                Some(description) => passed.push(description),
                None => {
                    all_passed = false;
                    break;
                }
            }
        }
        if !all_passed {
            continue;
        }

        let reason = if passed.is_empty() {
            format!("{}: triggered", rule.name)
        } else {
            format!("{}: {}", rule.name, passed.join(" AND "))
        };

        let mut produced = false;
        for action in &rule.actions {
            match action {
                RuleAction::AlertOnly { message } => {
                    outcome.alerts.push(BusEvent::alert_with(
                        AlertKind::RuleAction,
                        Severity::Info,
                        message.clone(),
                        json!({ "ruleId": rule.id, "reason": reason }),
                    ));
                    produced = true;
                }
                _ => {
                    for intent in action_intents(rule, action, &reason, ctx) {
                        outcome.intents.push(intent);
                        produced = true;
                    }
                }
            }
        }

        if produced {
            outcome.fired_rules.push(rule.id);
        }
    }

    for anomaly in ctx.take_anomalies() {
        outcome.alerts.push(BusEvent::alert(
            AlertKind::IndicatorAnomaly,
            Severity::Warning,
            anomaly,
        ));
    }

    outcome
}

fn trigger_due(rule: &Rule, ctx: &EvalContext) -> bool {
    match &rule.trigger {
        Trigger::Interval { every_secs } => match ctx.last_fires.get(&rule.id) {
            Some(last) => ctx.now - *last >= Duration::seconds(*every_secs as i64),
            None => true,
        },
        Trigger::Event { on } => ctx.pending_events.contains(on),
    }
}

/// Returns the human description of a passing condition, or `None` if it
/// failed. Missing data never errors; it reads as "condition false".
fn check_condition(condition: &Condition, ctx: &EvalContext) -> Option<String> {
    match condition {
        Condition::PriceChangePct {
            symbol,
            window_mins,
            cmp,
        } => {
            let change = ctx.price_change_pct(symbol, *window_mins)?;
            cmp.matches(change).then(|| {
                format!("{symbol} {window_mins}m change {change:.4} {}", cmp.describe())
            })
        }
        Condition::Indicator {
            name,
            symbol,
            params,
            cmp,
        } => {
            let lookup = ctx.indicator(*name, symbol, params);
            if matches!(lookup, IndicatorLookup::Insufficient | IndicatorLookup::Anomalous) {
                return None;
            }
            let value = indicator_decimal(&lookup)?;
            cmp.matches(value)
                .then(|| format!("{name:?}({symbol}) = {value:.4} {}", cmp.describe()))
        }
        Condition::Balance { symbol, cmp } => {
            let balance = ctx.balance(symbol);
            cmp.matches(balance)
                .then(|| format!("balance({symbol}) = {balance} {}", cmp.describe()))
        }
        Condition::AboveBaseline { symbol, min_pct } => {
            let baseline = ctx.baseline(symbol);
            let surplus = ctx.balance(symbol) - baseline;
            let passes = surplus >= *min_pct * baseline;
            passes.then(|| format!("{symbol} holds {surplus} above baseline {baseline}"))
        }
        Condition::PortfolioValueUsd { cmp } => {
            let value = ctx.portfolio_value();
            cmp.matches(value)
                .then(|| format!("portfolio ${value:.2} {}", cmp.describe()))
        }
        Condition::Custom { expr: text } => {
            // Validated at create time; a stale rule body fails closed.
            let parsed = expr::parse(text).ok()?;
            let passes = parsed.eval_bool(ctx).unwrap_or(false);
            passes.then(|| format!("[{text}]"))
        }
    }
}

fn action_intents(
    rule: &Rule,
    action: &RuleAction,
    reason: &str,
    ctx: &EvalContext,
) -> Vec<TradeIntent> {
    let mut intents = Vec::new();
    match action {
        RuleAction::Enter {
            symbol,
            allocation_pct,
        } => {
            let Some(price) = ctx.price(symbol) else {
                return intents;
            };
            let portfolio_value = ctx.portfolio_value();
            // Empty portfolio: entries are still allowed off a stable
            // (USDC) balance; with neither there is nothing to spend.
            let budget = if portfolio_value.is_zero() {
                ctx.balance("USDC")
            } else {
                portfolio_value
            };
            let quantity = (*allocation_pct * budget / price).normalize();
            if quantity > Decimal::ZERO {
                intents.push(make_intent(rule, symbol, OrderSide::Buy, quantity, price, reason, ctx));
            }
        }
        RuleAction::Exit {
            symbol,
            allocation_pct,
        } => {
            let Some(price) = ctx.price(symbol) else {
                return intents;
            };
            let quantity = (*allocation_pct * ctx.balance(symbol)).normalize();
            if quantity > Decimal::ZERO {
                intents.push(make_intent(rule, symbol, OrderSide::Sell, quantity, price, reason, ctx));
            }
        }
        RuleAction::Rebalance { target_weights } => {
            let portfolio_value = ctx.portfolio_value();
            if portfolio_value.is_zero() {
                return intents;
            }
            for (symbol, weight) in target_weights {
                let Some(price) = ctx.price(symbol) else {
                    continue;
                };
                let target_usd = *weight * portfolio_value;
                let current_usd = ctx.balance(symbol) * price;
                let delta_usd = target_usd - current_usd;
                if delta_usd.abs() < REBALANCE_MIN_DELTA_USD {
                    continue;
                }
                let side = if delta_usd > Decimal::ZERO {
                    OrderSide::Buy
                } else {
                    OrderSide::Sell
                };
                let quantity = (delta_usd.abs() / price).normalize();
                intents.push(make_intent(rule, symbol, side, quantity, price, reason, ctx));
            }
        }
        RuleAction::AlertOnly { .. } => unreachable!("handled by the caller"),
    }
    intents
}

fn make_intent(
    rule: &Rule,
    symbol: &str,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
    reason: &str,
    ctx: &EvalContext,
) -> TradeIntent {
    TradeIntent {
        rule_id: rule.id,
        rule_version: rule.version,
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
        reason: reason.to_string(),
        dry_run: ctx.dry_run,
        collateral: ctx.collateral.clone(),
        created_at: ctx.now,
    }
}
