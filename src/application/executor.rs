//! Order execution.
//!
//! Takes an approved trade, talks to the exchange, and records the
//! outcome. Dry-run short-circuits before any exchange call but still
//! produces an execution record. Transient failures retry on an
//! exponential backoff; permanent failures decline the approval with the
//! failure recorded.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::portfolio_service::PortfolioService;
use crate::application::risk_manager::RiskStateManager;
use crate::application::stores::Stores;
use crate::domain::approvals::{Approval, ApprovalAction, ApprovalStatus, Execution};
use crate::domain::errors::ExchangeError;
use crate::domain::events::{AlertKind, AlertRecord, BusEvent, EventKind, Severity};
use crate::domain::ports::ExchangeClient;
use crate::domain::types::{OrderRequest, OrderSide};
use crate::infrastructure::event_bus::EventBus;

/// Retry delays for transient exchange failures.
const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
];

pub struct TradeExecutor {
    exchange: Arc<dyn ExchangeClient>,
    stores: Stores,
    bus: EventBus,
    risk: RiskStateManager,
    portfolio: PortfolioService,
    backoff: Vec<Duration>,
}

impl TradeExecutor {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        stores: Stores,
        bus: EventBus,
        risk: RiskStateManager,
        portfolio: PortfolioService,
    ) -> Self {
        Self {
            exchange,
            stores,
            bus,
            risk,
            portfolio,
            backoff: DEFAULT_BACKOFF.to_vec(),
        }
    }

    /// Shrink the retry delays (tests).
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Execute an approved trade. Returns `None` when the kill-switch
    /// deferred it instead. The caller owns persisting the approval it
    /// handed in; this method saves every status change it makes.
    pub async fn execute(&self, approval: &mut Approval) -> Result<Option<Execution>> {
        let ApprovalAction::Trade {
            symbol,
            side,
            quantity,
            price,
            dry_run,
            ..
        } = approval.action.clone()
        else {
            anyhow::bail!("executor only handles trade actions");
        };

        let set = self.stores.set().await;

        // Kill-switch between approval and execution: defer, don't trade.
        if set.kill_switch.load().await?.enabled {
            approval.transition(ApprovalStatus::Deferred, None)?;
            set.approvals.save(approval).await?;
            self.publish_update(approval);
            info!(id = %approval.id, "execution deferred by kill-switch");
            return Ok(None);
        }

        self.bus.publish(BusEvent::new(
            EventKind::TradeSubmitted,
            json!({
                "approvalId": approval.id,
                "symbol": symbol,
                "side": side,
                "quantity": quantity,
                "dryRun": dry_run,
            }),
        ));

        let execution = if dry_run {
            self.dry_run_execution(approval, &symbol, side, quantity, price)
        } else {
            match self.place_with_retries(&symbol, side, quantity).await {
                Ok(result) => Execution {
                    id: Uuid::new_v4(),
                    approval_id: approval.id,
                    symbol: symbol.clone(),
                    side,
                    quantity,
                    fill_quantity: result.fill_quantity,
                    fill_price: result.fill_price,
                    fees: result.fees,
                    error: None,
                    dry_run: false,
                    timestamp: Utc::now(),
                },
                Err(err) => {
                    let execution = Execution {
                        id: Uuid::new_v4(),
                        approval_id: approval.id,
                        symbol: symbol.clone(),
                        side,
                        quantity,
                        fill_quantity: Decimal::ZERO,
                        fill_price: Decimal::ZERO,
                        fees: Decimal::ZERO,
                        error: Some(err.to_string()),
                        dry_run: false,
                        timestamp: Utc::now(),
                    };
                    set.executions.save(&execution).await?;
                    self.risk.release(&approval.id);

                    approval.transition(ApprovalStatus::Declined, Some("execution_failed"))?;
                    set.approvals.save(approval).await?;
                    self.publish_update(approval);

                    error!(id = %approval.id, error = %err, "execution failed");
                    self.bus.publish(BusEvent::alert(
                        AlertKind::ExecutionFailed,
                        Severity::Error,
                        format!("{symbol} {side} {quantity} failed: {err}"),
                    ));
                    return Ok(Some(execution));
                }
            }
        };

        set.executions.save(&execution).await?;
        self.risk.release(&approval.id);
        self.risk
            .record_execution(execution.timestamp, &symbol, approval.rule_id);

        if !dry_run {
            self.settle_lots(&execution).await?;
        }

        approval.execution_id = Some(execution.id);
        approval.transition(ApprovalStatus::Executed, None)?;
        set.approvals.save(approval).await?;
        self.publish_update(approval);

        self.bus.publish(BusEvent::new(
            EventKind::TradeResult,
            json!({
                "approvalId": approval.id,
                "executionId": execution.id,
                "symbol": execution.symbol,
                "side": execution.side,
                "fillQuantity": execution.fill_quantity,
                "fillPrice": execution.fill_price,
                "fees": execution.fees,
                "dryRun": execution.dry_run,
            }),
        ));

        if !dry_run {
            // A trade invalidates the last snapshot; force a fresh one.
            let _ = self.portfolio.refresh_portfolio("trade").await;
        }

        Ok(Some(execution))
    }

    fn dry_run_execution(
        &self,
        approval: &Approval,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Execution {
        Execution {
            id: Uuid::new_v4(),
            approval_id: approval.id,
            symbol: symbol.to_string(),
            side,
            quantity,
            fill_quantity: quantity,
            fill_price: price,
            fees: Decimal::ZERO,
            error: None,
            dry_run: true,
            timestamp: Utc::now(),
        }
    }

    async fn place_with_retries(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<crate::domain::types::OrderResult, ExchangeError> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            quantity,
            dry_run: false,
        };

        let mut attempt = 0;
        loop {
            match self.exchange.place_order(&request).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && attempt < self.backoff.len() => {
                    warn!(
                        %symbol,
                        attempt = attempt + 1,
                        error = %err,
                        "transient order failure; retrying"
                    );
                    sleep(self.backoff[attempt]).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// FIFO lot bookkeeping and daily-PnL accounting for a live fill.
    async fn settle_lots(&self, execution: &Execution) -> Result<()> {
        let set = self.stores.set().await;
        let mut book = set.lots.load().await.context("lot book load")?;

        match execution.side {
            OrderSide::Buy => {
                book.record_buy(&execution.symbol, execution.fill_quantity, execution.fill_price);
            }
            OrderSide::Sell => {
                let realized = book.record_sell(
                    &execution.symbol,
                    execution.fill_quantity,
                    execution.fill_price,
                ) - execution.fees;
                let tripped = self.risk.add_realized_pnl(execution.timestamp, realized);
                if tripped {
                    let message = format!(
                        "daily realized PnL {} breached the loss limit",
                        self.risk.daily_realized_pnl()
                    );
                    self.bus.publish(BusEvent::alert(
                        AlertKind::CircuitBreakerTripped,
                        Severity::Critical,
                        message.clone(),
                    ));
                    let record = AlertRecord {
                        alert: AlertKind::CircuitBreakerTripped,
                        severity: Severity::Critical,
                        message,
                        timestamp: execution.timestamp,
                    };
                    set.alerts.save(&record).await?;
                }
            }
        }

        set.lots.save(&book).await?;
        Ok(())
    }

    fn publish_update(&self, approval: &Approval) {
        self.bus.publish(BusEvent::new(
            EventKind::ApprovalUpdated,
            json!({ "id": approval.id, "status": approval.status }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tick_service::TriggerQueue;
    use crate::domain::approvals::ApprovalSource;
    use crate::infrastructure::exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn approved(symbol: &str, side: OrderSide, quantity: Decimal, dry_run: bool) -> Approval {
        let mut approval = Approval::new(
            ApprovalSource::Rule,
            ApprovalAction::Trade {
                symbol: symbol.to_string(),
                side,
                quantity,
                price: dec!(70000),
                value_usd: quantity * dec!(70000),
                dry_run,
            },
            "test",
        );
        approval.rule_id = Some(1);
        approval
            .transition(ApprovalStatus::Approved, Some("owner"))
            .unwrap();
        approval
    }

    async fn executor() -> (TradeExecutor, Arc<MockExchange>, Stores) {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_price("BTC", dec!(70000)).await;
        let stores = Stores::ephemeral();
        let bus = EventBus::new();
        let risk = RiskStateManager::new(stores.clone(), dec!(500));
        let portfolio = PortfolioService::new(
            exchange.clone(),
            stores.clone(),
            bus.clone(),
            TriggerQueue::new(),
        );
        let executor = TradeExecutor::new(
            exchange.clone(),
            stores.clone(),
            bus,
            risk,
            portfolio,
        )
        .with_backoff(vec![Duration::from_millis(1); 3]);
        (executor, exchange, stores)
    }

    #[tokio::test]
    async fn test_dry_run_records_without_touching_balances() {
        let (executor, exchange, stores) = executor().await;
        let mut approval = approved("BTC", OrderSide::Sell, dec!(0.4), true);

        let execution = executor.execute(&mut approval).await.unwrap().unwrap();
        assert!(execution.dry_run);
        assert_eq!(approval.status, ApprovalStatus::Executed);
        assert_eq!(exchange.get_all_balances().await.unwrap()["BTC"], dec!(1));

        let set = stores.set().await;
        assert_eq!(set.executions.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_to_success() {
        let (executor, exchange, _stores) = executor().await;
        exchange.fail_next();
        let mut approval = approved("BTC", OrderSide::Sell, dec!(0.4), false);

        let execution = executor.execute(&mut approval).await.unwrap().unwrap();
        assert!(execution.error.is_none());
        assert_eq!(approval.status, ApprovalStatus::Executed);
    }

    #[tokio::test]
    async fn test_fatal_failure_declines_approval() {
        let (executor, _exchange, stores) = executor().await;
        // Selling more than the mock holds is a fatal error.
        let mut approval = approved("BTC", OrderSide::Sell, dec!(5), false);

        let execution = executor.execute(&mut approval).await.unwrap().unwrap();
        assert!(execution.error.is_some());
        assert_eq!(approval.status, ApprovalStatus::Declined);
        assert_eq!(approval.acted_by.as_deref(), Some("execution_failed"));

        let set = stores.set().await;
        let saved = set.approvals.get(approval.id).await.unwrap().unwrap();
        assert_eq!(saved.status, ApprovalStatus::Declined);
    }

    #[tokio::test]
    async fn test_kill_switch_defers_instead_of_executing() {
        let (executor, _exchange, stores) = executor().await;
        let set = stores.set().await;
        let mut ks = set.kill_switch.load().await.unwrap();
        ks.enabled = true;
        set.kill_switch.save(&ks).await.unwrap();

        let mut approval = approved("BTC", OrderSide::Sell, dec!(0.4), false);
        let outcome = executor.execute(&mut approval).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(approval.status, ApprovalStatus::Deferred);
    }

    #[tokio::test]
    async fn test_losing_sell_trips_breaker_and_persists_alert() {
        let (executor, exchange, stores) = executor().await;

        // Seed the lot book with an expensive lot so the sell realizes a loss.
        let set = stores.set().await;
        let mut book = set.lots.load().await.unwrap();
        book.record_buy("BTC", dec!(1), dec!(75000));
        set.lots.save(&book).await.unwrap();
        exchange.set_price("BTC", dec!(70000)).await;

        // 0.2 BTC * (70000 - 75000) = -1000, past the 500 limit.
        let mut approval = approved("BTC", OrderSide::Sell, dec!(0.2), false);
        executor.execute(&mut approval).await.unwrap().unwrap();

        let alerts = set.alerts.recent(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }
}
