//! Shared wiring for the integration scenarios: the full service stack on
//! ephemeral stores with the mock exchange.
#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use coinward::application::approval_workflow::{ApprovalWorkflow, WorkflowPolicy};
use coinward::application::executor::TradeExecutor;
use coinward::application::portfolio_service::PortfolioService;
use coinward::application::risk_manager::RiskStateManager;
use coinward::application::stores::Stores;
use coinward::application::tick_service::{TickService, TriggerQueue};
use coinward::domain::objectives::Objectives;
use coinward::domain::rules::dsl::{
    Comparator, Condition, GuardrailKind, RiskBlock, Rule, RuleAction, Trigger,
};
use coinward::infrastructure::event_bus::EventBus;
use coinward::infrastructure::exchange::MockExchange;

pub struct TestApp {
    pub stores: Stores,
    pub bus: EventBus,
    pub exchange: Arc<MockExchange>,
    pub risk: RiskStateManager,
    pub portfolio: PortfolioService,
    pub workflow: Arc<ApprovalWorkflow>,
    pub tick: Arc<TickService>,
    pub triggers: TriggerQueue,
}

pub struct TestOptions {
    pub owner_configured: bool,
    pub dry_run_default: bool,
    pub mfa_threshold_usd: Decimal,
    pub daily_loss_limit_usd: Decimal,
    pub min_trade_usd: Decimal,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            owner_configured: true,
            dry_run_default: true,
            mfa_threshold_usd: Decimal::ZERO,
            daily_loss_limit_usd: dec!(500),
            min_trade_usd: Decimal::ZERO,
        }
    }
}

pub async fn build(options: TestOptions) -> TestApp {
    let stores = Stores::ephemeral();
    let bus = EventBus::new();
    let exchange = Arc::new(MockExchange::new());
    let triggers = TriggerQueue::new();

    let risk = RiskStateManager::new(stores.clone(), options.daily_loss_limit_usd);
    let portfolio = PortfolioService::new(
        exchange.clone(),
        stores.clone(),
        bus.clone(),
        triggers.clone(),
    );
    let executor = Arc::new(
        TradeExecutor::new(
            exchange.clone(),
            stores.clone(),
            bus.clone(),
            risk.clone(),
            portfolio.clone(),
        )
        .with_backoff(vec![Duration::from_millis(1); 3]),
    );
    let workflow = Arc::new(ApprovalWorkflow::new(
        stores.clone(),
        bus.clone(),
        executor,
        risk.clone(),
        WorkflowPolicy {
            mfa_threshold_usd: options.mfa_threshold_usd,
            owner_configured: options.owner_configured,
        },
    ));
    let tick = Arc::new(TickService::new(
        stores.clone(),
        bus.clone(),
        risk.clone(),
        workflow.clone(),
        triggers.clone(),
        options.owner_configured,
        options.dry_run_default,
        options.min_trade_usd,
        options.daily_loss_limit_usd,
    ));

    TestApp {
        stores,
        bus,
        exchange,
        risk,
        portfolio,
        workflow,
        tick,
        triggers,
    }
}

impl TestApp {
    /// Seed the exchange and take the bootstrap snapshot.
    pub async fn seed_portfolio(&self, holdings: &[(&str, Decimal, Decimal)]) {
        for (asset, quantity, price) in holdings {
            self.exchange.set_balance(asset, *quantity).await;
            self.exchange.set_price(asset, *price).await;
        }
        self.portfolio.refresh_portfolio("bootstrap").await.unwrap();
    }

    pub async fn save_objectives(&self, objectives: &Objectives) {
        let set = self.stores.set().await;
        set.objectives.save(objectives).await.unwrap();
    }

    pub async fn add_rule(&self, rule: &Rule) -> Rule {
        let set = self.stores.set().await;
        set.rules.create(rule).await.unwrap()
    }
}

/// An interval-triggered exit rule with baseline protection on.
pub fn exit_rule(symbol: &str, allocation_pct: Decimal) -> Rule {
    Rule {
        id: 0,
        version: 1,
        name: format!("{symbol} profit take"),
        enabled: true,
        trigger: Trigger::Interval { every_secs: 0 },
        conditions: vec![Condition::Balance {
            symbol: symbol.to_string(),
            cmp: Comparator::gt(Decimal::ZERO),
        }],
        actions: vec![RuleAction::Exit {
            symbol: symbol.to_string(),
            allocation_pct,
        }],
        risk: RiskBlock {
            max_position_pct: Decimal::ONE,
            cooldown_secs: 0,
            guardrails: [
                GuardrailKind::BaselineProtection,
                GuardrailKind::CollateralProtection,
            ]
            .into(),
        },
    }
}
