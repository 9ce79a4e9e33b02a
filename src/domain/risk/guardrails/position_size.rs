use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};

/// Step 6: no single trade may exceed the rule's share of portfolio value.
/// Oversized trades are clamped to the cap by default.
pub struct PositionSizing {
    clamp: bool,
}

impl PositionSizing {
    pub fn new() -> Self {
        Self { clamp: true }
    }
}

impl Default for PositionSizing {
    fn default() -> Self {
        Self::new()
    }
}

impl Guardrail for PositionSizing {
    fn name(&self) -> &'static str {
        "positionSizing"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, quantity: Decimal) -> GuardrailOutcome {
        if ctx.portfolio_value <= Decimal::ZERO {
            return GuardrailOutcome::Pass;
        }
        let max_pct = ctx.risk_block.max_position_pct;
        let value = quantity * ctx.intent.price;
        let pct = value / ctx.portfolio_value;
        if pct <= max_pct {
            return GuardrailOutcome::Pass;
        }

        if !self.clamp || ctx.intent.price.is_zero() {
            return GuardrailOutcome::Reject {
                reason: format!("position {pct:.4} of portfolio exceeds cap {max_pct}"),
            };
        }
        let capped = max_pct * ctx.portfolio_value / ctx.intent.price;
        GuardrailOutcome::Clamp {
            quantity: capped,
            note: format!("clamped {quantity} -> {capped} to stay within {max_pct} of portfolio"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::domain::risk::guardrails::test_support::harness;

    #[test]
    fn test_small_position_passes() {
        let mut h = harness().balance("USDC", dec!(100000)).buy("BTC", dec!(0.1));
        h.risk_block.max_position_pct = dec!(0.25);
        // 0.1 BTC * 70000 = 7000 = 7% of 100k
        assert_eq!(h.run(&PositionSizing::new()), GuardrailOutcome::Pass);
    }

    #[test]
    fn test_oversized_position_clamps() {
        let mut h = harness().balance("USDC", dec!(100000)).buy("BTC", dec!(1));
        h.risk_block.max_position_pct = dec!(0.1);
        // 70000 = 70% of portfolio; cap at 10% = 10000 / 70000 BTC
        match h.run(&PositionSizing::new()) {
            GuardrailOutcome::Clamp { quantity, .. } => {
                assert!((quantity * dec!(70000) - dec!(10000)).abs() < dec!(0.01));
            }
            other => panic!("expected clamp, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_portfolio_skips() {
        let h = harness().buy("BTC", dec!(1));
        assert_eq!(h.run(&PositionSizing::new()), GuardrailOutcome::Pass);
    }
}
