use chrono::Duration;
use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};

/// Step 2: a rule may not execute again until its cooldown has elapsed.
pub struct Cooldown;

impl Guardrail for Cooldown {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, _quantity: Decimal) -> GuardrailOutcome {
        let cooldown = ctx.risk_block.cooldown_secs;
        if cooldown == 0 {
            return GuardrailOutcome::Pass;
        }
        if let Some(last) = ctx.risk.last_execution.get(&ctx.intent.rule_id) {
            let elapsed = ctx.now - *last;
            if elapsed < Duration::seconds(cooldown as i64) {
                return GuardrailOutcome::Reject {
                    reason: format!(
                        "rule {} executed {}s ago, cooldown {}s",
                        ctx.intent.rule_id,
                        elapsed.num_seconds(),
                        cooldown
                    ),
                };
            }
        }
        GuardrailOutcome::Pass
    }
}
