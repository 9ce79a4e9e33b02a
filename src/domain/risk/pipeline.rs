//! The guardrail pipeline.
//!
//! Steps run in a fixed order; a rejection stops the run immediately
//! ("fail fast") while clamps adjust the quantity seen by later steps.
//! Rejections are not errors: the caller turns the chain into a
//! `risk_blocked` alert and moves on.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::domain::risk::guardrails::{
    BaselineProtection, CircuitBreaker, CollateralProtection, Cooldown, Guardrail,
    GuardrailContext, GuardrailOutcome, KillSwitchGate, MinTradeSize, PositionSizing,
    VelocityThrottle,
};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineVerdict {
    Accepted {
        /// Final quantity after any clamping.
        quantity: Decimal,
        /// Clamp annotations, e.g. "baselineProtection: clamped 0.4 -> 0.3".
        notes: Vec<String>,
        /// Pass-with-warning annotations (surfaced as warning alerts).
        warnings: Vec<String>,
    },
    Rejected {
        /// Annotations up to and including the rejecting step.
        chain: Vec<String>,
    },
}

pub struct RiskPipeline {
    guardrails: Vec<Box<dyn Guardrail>>,
}

impl RiskPipeline {
    /// The standard pipeline in its specified order.
    pub fn standard() -> Self {
        Self {
            guardrails: vec![
                Box::new(KillSwitchGate),
                Box::new(Cooldown),
                Box::new(VelocityThrottle),
                Box::new(BaselineProtection::new()),
                Box::new(CollateralProtection),
                Box::new(PositionSizing::new()),
                Box::new(MinTradeSize),
                Box::new(CircuitBreaker),
            ],
        }
    }

    #[cfg(test)]
    pub fn with_guardrails(guardrails: Vec<Box<dyn Guardrail>>) -> Self {
        Self { guardrails }
    }

    pub fn evaluate(&self, ctx: &GuardrailContext<'_>) -> PipelineVerdict {
        let mut quantity = ctx.intent.quantity;
        let mut notes = Vec::new();
        let mut warnings = Vec::new();

        debug!(
            rule_id = ctx.intent.rule_id,
            symbol = %ctx.intent.symbol,
            side = %ctx.intent.side,
            %quantity,
            "risk pipeline start"
        );

        for guardrail in &self.guardrails {
            match guardrail.check(ctx, quantity) {
                GuardrailOutcome::Pass => {}
                GuardrailOutcome::Warn { note } => {
                    warnings.push(format!("{}: {}", guardrail.name(), note));
                }
                GuardrailOutcome::Clamp {
                    quantity: adjusted,
                    note,
                } => {
                    notes.push(format!("{}: {}", guardrail.name(), note));
                    quantity = adjusted;
                }
                GuardrailOutcome::Reject { reason } => {
                    warn!(
                        rule_id = ctx.intent.rule_id,
                        step = guardrail.name(),
                        %reason,
                        "intent rejected"
                    );
                    let mut chain = notes;
                    chain.push(format!("{}: {}", guardrail.name(), reason));
                    return PipelineVerdict::Rejected { chain };
                }
            }
        }

        PipelineVerdict::Accepted {
            quantity,
            notes,
            warnings,
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.guardrails.iter().map(|g| g.name()).collect()
    }
}
