use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};
use crate::domain::types::OrderSide;

/// Step 4: a sell may never take a holding below its protected floor.
///
/// The floor is the stored baseline, raised to the policy's `min_tokens`
/// when that is higher. Core assets are protected unconditionally; other
/// assets only when the proposing rule opted in (a baseline for them
/// rarely exists, which makes the check a no-op). The default policy is
/// to clamp to the allowed surplus rather than reject.
pub struct BaselineProtection {
    clamp: bool,
}

impl BaselineProtection {
    pub fn new() -> Self {
        Self { clamp: true }
    }

    pub fn rejecting() -> Self {
        Self { clamp: false }
    }
}

impl Default for BaselineProtection {
    fn default() -> Self {
        Self::new()
    }
}

impl Guardrail for BaselineProtection {
    fn name(&self) -> &'static str {
        "baselineProtection"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, quantity: Decimal) -> GuardrailOutcome {
        if ctx.intent.side != OrderSide::Sell {
            return GuardrailOutcome::Pass;
        }

        let symbol = &ctx.intent.symbol;
        let mut floor = ctx.baseline(symbol);
        if let Some(policy) = ctx.objectives.core_assets.get(symbol) {
            floor = floor.max(policy.min_tokens);
        }
        if floor.is_zero() {
            return GuardrailOutcome::Pass;
        }

        let balance = ctx.balance(symbol);
        let allowed = (balance - floor).max(Decimal::ZERO);
        if quantity <= allowed {
            return GuardrailOutcome::Pass;
        }
        if allowed.is_zero() || !self.clamp {
            return GuardrailOutcome::Reject {
                reason: format!(
                    "selling {quantity} {symbol} would breach baseline {floor} (balance {balance})"
                ),
            };
        }
        GuardrailOutcome::Clamp {
            quantity: allowed,
            note: format!("clamped {quantity} -> {allowed} to protect baseline {floor}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::guardrails::test_support::harness;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sell_within_surplus_passes() {
        let h = harness()
            .balance("BTC", dec!(0.8))
            .baseline("BTC", dec!(0.5))
            .sell("BTC", dec!(0.2));
        assert_eq!(
            h.run(&BaselineProtection::new()),
            GuardrailOutcome::Pass
        );
    }

    #[test]
    fn test_oversized_sell_clamps_to_surplus() {
        let h = harness()
            .balance("BTC", dec!(0.8))
            .baseline("BTC", dec!(0.5))
            .sell("BTC", dec!(0.4));
        match h.run(&BaselineProtection::new()) {
            GuardrailOutcome::Clamp { quantity, .. } => assert_eq!(quantity, dec!(0.3)),
            other => panic!("expected clamp, got {other:?}"),
        }
    }

    #[test]
    fn test_no_surplus_rejects() {
        let h = harness()
            .balance("BTC", dec!(0.5))
            .baseline("BTC", dec!(0.5))
            .sell("BTC", dec!(0.1));
        assert!(matches!(
            h.run(&BaselineProtection::new()),
            GuardrailOutcome::Reject { .. }
        ));
    }

    #[test]
    fn test_reject_policy_never_clamps() {
        let h = harness()
            .balance("BTC", dec!(0.8))
            .baseline("BTC", dec!(0.5))
            .sell("BTC", dec!(0.4));
        assert!(matches!(
            h.run(&BaselineProtection::rejecting()),
            GuardrailOutcome::Reject { .. }
        ));
    }

    #[test]
    fn test_buys_ignored() {
        let h = harness()
            .balance("BTC", dec!(0.8))
            .baseline("BTC", dec!(0.5))
            .buy("BTC", dec!(10));
        assert_eq!(h.run(&BaselineProtection::new()), GuardrailOutcome::Pass);
    }

    #[test]
    fn test_min_tokens_raises_floor() {
        // XRP default policy keeps min_tokens at 10.
        let h = harness()
            .balance("XRP", dec!(15))
            .baseline("XRP", dec!(2))
            .sell("XRP", dec!(10));
        match h.run(&BaselineProtection::new()) {
            GuardrailOutcome::Clamp { quantity, .. } => assert_eq!(quantity, dec!(5)),
            other => panic!("expected clamp, got {other:?}"),
        }
    }
}
