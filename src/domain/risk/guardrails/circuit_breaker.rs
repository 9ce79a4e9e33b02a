use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};
use crate::domain::types::OrderSide;

/// Step 8: once the daily loss limit is breached, the book stops digging.
///
/// While tripped (until midnight UTC re-arms it): every new entry is
/// rejected, and exits are rejected when they would realize a further loss
/// (fill price below the FIFO cost basis). Profit-taking exits still pass,
/// since they reduce exposure.
pub struct CircuitBreaker;

impl Guardrail for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuitDrawdown"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, _quantity: Decimal) -> GuardrailOutcome {
        let tripped = ctx.risk.is_tripped()
            || ctx.risk.daily_realized_pnl < -ctx.daily_loss_limit_usd;
        if !tripped {
            return GuardrailOutcome::Pass;
        }

        match ctx.intent.side {
            OrderSide::Buy => GuardrailOutcome::Reject {
                reason: format!(
                    "daily loss {} breached limit {}; entries halted until midnight UTC",
                    ctx.risk.daily_realized_pnl, ctx.daily_loss_limit_usd
                ),
            },
            OrderSide::Sell => {
                let losing = ctx
                    .cost_basis
                    .get(&ctx.intent.symbol)
                    .is_some_and(|cost| ctx.intent.price < *cost);
                if losing {
                    GuardrailOutcome::Reject {
                        reason: format!(
                            "breaker tripped; refusing to realize further loss on {}",
                            ctx.intent.symbol
                        ),
                    }
                } else {
                    GuardrailOutcome::Pass
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::risk::guardrails::test_support::harness;

    #[test]
    fn test_armed_breaker_passes() {
        let h = harness().buy("BTC", dec!(0.1));
        assert_eq!(h.run(&CircuitBreaker), GuardrailOutcome::Pass);
    }

    #[test]
    fn test_tripped_breaker_halts_entries() {
        let mut h = harness().buy("BTC", dec!(0.1));
        h.risk.add_realized_pnl(Utc::now(), dec!(-600), dec!(500));
        assert!(matches!(
            h.run(&CircuitBreaker),
            GuardrailOutcome::Reject { .. }
        ));
    }

    #[test]
    fn test_tripped_breaker_blocks_losing_exits() {
        let mut h = harness().sell("BTC", dec!(0.1)).cost("BTC", dec!(80000));
        h.risk.add_realized_pnl(Utc::now(), dec!(-600), dec!(500));
        // Spot 70000 < cost 80000: would realize more loss.
        assert!(matches!(
            h.run(&CircuitBreaker),
            GuardrailOutcome::Reject { .. }
        ));
    }

    #[test]
    fn test_tripped_breaker_allows_profit_taking() {
        let mut h = harness().sell("BTC", dec!(0.1)).cost("BTC", dec!(50000));
        h.risk.add_realized_pnl(Utc::now(), dec!(-600), dec!(500));
        assert_eq!(h.run(&CircuitBreaker), GuardrailOutcome::Pass);
    }
}
