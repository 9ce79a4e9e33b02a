use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};

/// Step 1: nothing passes while the global halt flag is up.
pub struct KillSwitchGate;

impl Guardrail for KillSwitchGate {
    fn name(&self) -> &'static str {
        "killSwitch"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, _quantity: Decimal) -> GuardrailOutcome {
        if ctx.kill_switch {
            GuardrailOutcome::Reject {
                reason: "kill-switch enabled".to_string(),
            }
        } else {
            GuardrailOutcome::Pass
        }
    }
}
