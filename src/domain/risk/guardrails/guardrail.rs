use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::intent::TradeIntent;
use crate::domain::objectives::Objectives;
use crate::domain::risk::state::RiskState;
use crate::domain::rules::dsl::RiskBlock;
use crate::domain::types::CollateralRecord;

/// Everything a guardrail may consult while judging one intent.
///
/// Guardrails never reach back into live stores: the pipeline snapshots
/// this context once, under the risk mutex, and every step sees the same
/// world.
pub struct GuardrailContext<'a> {
    pub intent: &'a TradeIntent,
    /// The proposing rule's risk block (cooldown, max position size).
    pub risk_block: &'a RiskBlock,
    pub balances: &'a HashMap<String, Decimal>,
    pub baselines: &'a HashMap<String, Decimal>,
    pub collateral: &'a [CollateralRecord],
    /// Average unit cost per asset, from the FIFO lot book.
    pub cost_basis: &'a HashMap<String, Decimal>,
    pub portfolio_value: Decimal,
    pub risk: &'a RiskState,
    pub objectives: &'a Objectives,
    pub kill_switch: bool,
    pub min_trade_usd: Decimal,
    pub daily_loss_limit_usd: Decimal,
    pub now: DateTime<Utc>,
}

impl GuardrailContext<'_> {
    pub fn balance(&self, symbol: &str) -> Decimal {
        self.balances.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn baseline(&self, symbol: &str) -> Decimal {
        self.baselines.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn locked(&self, symbol: &str) -> Decimal {
        self.collateral
            .iter()
            .filter(|c| c.asset == symbol)
            .map(|c| c.locked)
            .sum()
    }
}

/// Verdict of a single guardrail on the intent at its current size.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailOutcome {
    Pass,
    /// Pass, but surface a warning (e.g. high LTV) to the alert stream.
    Warn { note: String },
    /// Reduce the trade to `quantity` and continue down the pipeline.
    Clamp { quantity: Decimal, note: String },
    Reject { reason: String },
}

/// One step of the risk pipeline.
///
/// Steps run in a fixed order and each sees the quantity as adjusted by
/// the steps before it.
pub trait Guardrail: Send + Sync {
    /// Name used in rejection chains and alerts, e.g. "baselineProtection".
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &GuardrailContext<'_>, quantity: Decimal) -> GuardrailOutcome;
}
