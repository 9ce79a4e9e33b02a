use rust_decimal::Decimal;

use crate::domain::risk::guardrails::guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};
use crate::domain::risk::state::{GLOBAL_HOURLY_LIMIT, PER_ASSET_HOURLY_LIMIT};

/// Step 3: rolling-hour trade-count limits, global and per asset.
pub struct VelocityThrottle;

impl Guardrail for VelocityThrottle {
    fn name(&self) -> &'static str {
        "throttleVelocity"
    }

    fn check(&self, ctx: &GuardrailContext<'_>, _quantity: Decimal) -> GuardrailOutcome {
        let global = ctx.risk.trades_last_hour();
        if global >= GLOBAL_HOURLY_LIMIT {
            return GuardrailOutcome::Reject {
                reason: format!("{global} trades in the last hour (limit {GLOBAL_HOURLY_LIMIT})"),
            };
        }
        let per_asset = ctx.risk.trades_last_hour_for(&ctx.intent.symbol);
        if per_asset >= PER_ASSET_HOURLY_LIMIT {
            return GuardrailOutcome::Reject {
                reason: format!(
                    "{per_asset} {} trades in the last hour (limit {PER_ASSET_HOURLY_LIMIT})",
                    ctx.intent.symbol
                ),
            };
        }
        GuardrailOutcome::Pass
    }
}
