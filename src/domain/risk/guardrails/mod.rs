mod baseline_protection;
mod circuit_breaker;
mod collateral_protection;
mod cooldown;
mod guardrail;
mod kill_switch;
mod min_trade;
mod position_size;
mod velocity;

pub use baseline_protection::BaselineProtection;
pub use circuit_breaker::CircuitBreaker;
pub use collateral_protection::CollateralProtection;
pub use cooldown::Cooldown;
pub use guardrail::{Guardrail, GuardrailContext, GuardrailOutcome};
pub use kill_switch::KillSwitchGate;
pub use min_trade::MinTradeSize;
pub use position_size::PositionSizing;
pub use velocity::VelocityThrottle;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    use super::{Guardrail, GuardrailContext, GuardrailOutcome};
    use crate::domain::intent::TradeIntent;
    use crate::domain::objectives::Objectives;
    use crate::domain::risk::state::RiskState;
    use crate::domain::rules::dsl::RiskBlock;
    use crate::domain::types::{CollateralRecord, OrderSide};

    /// Fluent fixture for exercising a single guardrail.
    pub struct Harness {
        pub balances: HashMap<String, Decimal>,
        pub baselines: HashMap<String, Decimal>,
        pub prices: HashMap<String, Decimal>,
        pub collateral: Vec<CollateralRecord>,
        pub cost_basis: HashMap<String, Decimal>,
        pub risk: RiskState,
        pub risk_block: RiskBlock,
        pub objectives: Objectives,
        pub kill_switch: bool,
        pub min_trade_usd: Decimal,
        pub daily_loss_limit_usd: Decimal,
        pub symbol: String,
        pub side: OrderSide,
        pub quantity: Decimal,
    }

    pub fn harness() -> Harness {
        let mut prices = HashMap::new();
        prices.insert("BTC".to_string(), dec!(70000));
        prices.insert("XRP".to_string(), dec!(2));
        prices.insert("USDC".to_string(), dec!(1));
        Harness {
            balances: HashMap::new(),
            baselines: HashMap::new(),
            prices,
            collateral: vec![],
            cost_basis: HashMap::new(),
            risk: RiskState::default(),
            risk_block: RiskBlock {
                max_position_pct: dec!(1),
                cooldown_secs: 0,
                guardrails: Default::default(),
            },
            objectives: Objectives::default(),
            kill_switch: false,
            min_trade_usd: Decimal::ZERO,
            daily_loss_limit_usd: dec!(500),
            symbol: "BTC".to_string(),
            side: OrderSide::Sell,
            quantity: dec!(0.1),
        }
    }

    impl Harness {
        pub fn balance(mut self, symbol: &str, quantity: Decimal) -> Self {
            self.balances.insert(symbol.to_string(), quantity);
            self
        }

        pub fn baseline(mut self, symbol: &str, quantity: Decimal) -> Self {
            self.baselines.insert(symbol.to_string(), quantity);
            self
        }

        pub fn price(mut self, symbol: &str, price: Decimal) -> Self {
            self.prices.insert(symbol.to_string(), price);
            self
        }

        pub fn locked(mut self, asset: &str, locked: Decimal, ltv: Decimal) -> Self {
            self.collateral.push(CollateralRecord {
                asset: asset.to_string(),
                locked,
                ltv,
                health: dec!(2),
            });
            self
        }

        pub fn cost(mut self, asset: &str, unit_cost: Decimal) -> Self {
            self.cost_basis.insert(asset.to_string(), unit_cost);
            self
        }

        pub fn sell(mut self, symbol: &str, quantity: Decimal) -> Self {
            self.symbol = symbol.to_string();
            self.side = OrderSide::Sell;
            self.quantity = quantity;
            self
        }

        pub fn buy(mut self, symbol: &str, quantity: Decimal) -> Self {
            self.symbol = symbol.to_string();
            self.side = OrderSide::Buy;
            self.quantity = quantity;
            self
        }

        pub fn run(&self, guardrail: &dyn Guardrail) -> GuardrailOutcome {
            let price = self
                .prices
                .get(&self.symbol)
                .copied()
                .unwrap_or(Decimal::ONE);
            let intent = TradeIntent {
                rule_id: 1,
                rule_version: 1,
                symbol: self.symbol.clone(),
                side: self.side,
                quantity: self.quantity,
                price,
                reason: "test".to_string(),
                dry_run: true,
                collateral: self.collateral.clone(),
                created_at: Utc::now(),
            };
            let portfolio_value =
                crate::domain::types::portfolio_value_usd(&self.balances, &self.prices);
            let ctx = GuardrailContext {
                intent: &intent,
                risk_block: &self.risk_block,
                balances: &self.balances,
                baselines: &self.baselines,
                collateral: &self.collateral,
                cost_basis: &self.cost_basis,
                portfolio_value,
                risk: &self.risk,
                objectives: &self.objectives,
                kill_switch: self.kill_switch,
                min_trade_usd: self.min_trade_usd,
                daily_loss_limit_usd: self.daily_loss_limit_usd,
                now: Utc::now(),
            };
            guardrail.check(&ctx, self.quantity)
        }
    }
}
