use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};
use crate::domain::types::OrderSide;

/// LTV above this is flagged even when the sell itself is allowed.
const LTV_WARNING_THRESHOLD: Decimal = dec!(0.7);

/// Step 5: collateral-locked quantity is not for sale.
///
/// A sell larger than the free (unlocked) quantity is rejected outright.
/// When the loan's LTV is already high the sell still goes through if it
/// does not increase LTV (selling free quantity never does), but a
/// warning is surfaced for the owner.
pub struct CollateralProtection;

impl Guardrail for CollateralProtection {
    fn name(&self) -> &'static str {
        "collateralProtection"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, quantity: Decimal) -> GuardrailOutcome {
        if ctx.intent.side != OrderSide::Sell {
            return GuardrailOutcome::Pass;
        }

        let symbol = &ctx.intent.symbol;
        let locked = ctx.locked(symbol);
        if locked.is_zero() {
            return GuardrailOutcome::Pass;
        }

        let free = (ctx.balance(symbol) - locked).max(Decimal::ZERO);
        if quantity > free {
            return GuardrailOutcome::Reject {
                reason: format!("free={free} < requested={quantity}"),
            };
        }

        let max_ltv = ctx
            .collateral
            .iter()
            .filter(|c| c.asset == *symbol)
            .map(|c| c.ltv)
            .max()
            .unwrap_or(Decimal::ZERO);
        if max_ltv > LTV_WARNING_THRESHOLD {
            return GuardrailOutcome::Warn {
                note: format!("{symbol} loan LTV {max_ltv} above {LTV_WARNING_THRESHOLD}"),
            };
        }

        GuardrailOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::guardrails::test_support::harness;

    #[test]
    fn test_sell_of_free_quantity_passes() {
        let h = harness()
            .balance("BTC", dec!(2.0))
            .locked("BTC", dec!(1.8), dec!(0.5))
            .sell("BTC", dec!(0.2));
        assert_eq!(h.run(&CollateralProtection), GuardrailOutcome::Pass);
    }

    #[test]
    fn test_sell_into_locked_quantity_rejects() {
        let h = harness()
            .balance("BTC", dec!(2.0))
            .locked("BTC", dec!(1.8), dec!(0.5))
            .sell("BTC", dec!(0.5));
        match h.run(&CollateralProtection) {
            GuardrailOutcome::Reject { reason } => {
                assert_eq!(reason, "free=0.2 < requested=0.5");
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_high_ltv_warns_but_allows() {
        let h = harness()
            .balance("BTC", dec!(2.0))
            .locked("BTC", dec!(1.0), dec!(0.8))
            .sell("BTC", dec!(0.5));
        assert!(matches!(
            h.run(&CollateralProtection),
            GuardrailOutcome::Warn { .. }
        ));
    }

    #[test]
    fn test_uncollateralized_asset_ignored() {
        let h = harness().balance("XRP", dec!(100)).sell("XRP", dec!(50));
        assert_eq!(h.run(&CollateralProtection), GuardrailOutcome::Pass);
    }
}
