use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};

/// Step 7: dust trades are not worth the fees.
pub struct MinTradeSize;

impl Guardrail for MinTradeSize {
    fn name(&self) -> &'static str {
        "minTradeSize"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, quantity: Decimal) -> GuardrailOutcome {
        let value = quantity * ctx.intent.price;
        if value < ctx.min_trade_usd {
            return GuardrailOutcome::Reject {
                reason: format!("${value:.2} below minimum ${:.2}", ctx.min_trade_usd),
            };
        }
        GuardrailOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::domain::risk::guardrails::test_support::harness;

    #[test]
    fn test_dust_rejected() {
        let mut h = harness().sell("XRP", dec!(1));
        h.min_trade_usd = dec!(10);
        // 1 XRP * $2 = $2
        assert!(matches!(
            h.run(&MinTradeSize),
            GuardrailOutcome::Reject { .. }
        ));
    }

    #[test]
    fn test_meaningful_size_passes() {
        let mut h = harness().sell("XRP", dec!(100));
        h.min_trade_usd = dec!(10);
        assert_eq!(h.run(&MinTradeSize), GuardrailOutcome::Pass);
    }
}
