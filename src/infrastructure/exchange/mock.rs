//! Deterministic in-process exchange.
//!
//! Serves two jobs: the default client when no live connector is
//! configured (dry-run installations), and the controllable fixture for
//! tests. Orders fill at the posted spot price with a flat fee and mutate
//! the held balances, so end-to-end flows observe realistic state.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeClient;
use crate::domain::types::{CollateralRecord, OrderRequest, OrderResult, OrderSide, OrderStatus};

/// Flat taker fee charged on fills.
const FEE_RATE: Decimal = dec!(0.006);

pub struct MockExchange {
    balances: RwLock<HashMap<String, Decimal>>,
    prices: RwLock<HashMap<String, Decimal>>,
    collateral: RwLock<Vec<CollateralRecord>>,
    fail_next: AtomicBool,
    order_seq: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            collateral: RwLock::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            order_seq: AtomicU64::new(1),
        }
    }

    pub async fn set_balance(&self, asset: &str, quantity: Decimal) {
        self.balances
            .write()
            .await
            .insert(asset.to_string(), quantity);
    }

    pub async fn set_price(&self, asset: &str, price: Decimal) {
        self.prices.write().await.insert(asset.to_string(), price);
    }

    pub async fn set_collateral(&self, records: Vec<CollateralRecord>) {
        *self.collateral.write().await = records;
    }

    /// Make the next call fail with a transient error (consumed once).
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), ExchangeError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ExchangeError::transient("injected failure"));
        }
        Ok(())
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn get_all_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.check_failure()?;
        Ok(self.balances.read().await.clone())
    }

    async fn get_spot_prices(
        &self,
        assets: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.check_failure()?;
        let prices = self.prices.read().await;
        Ok(assets
            .iter()
            .filter_map(|a| prices.get(a).map(|p| (a.clone(), *p)))
            .collect())
    }

    async fn get_collateral(&self) -> Result<Vec<CollateralRecord>, ExchangeError> {
        self.check_failure()?;
        Ok(self.collateral.read().await.clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        self.check_failure()?;

        let order_id = format!("mock-{}", self.order_seq.fetch_add(1, Ordering::SeqCst));
        let price = self
            .prices
            .read()
            .await
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| ExchangeError::fatal(format!("unknown product {}", order.symbol)))?;

        if order.dry_run {
            return Ok(OrderResult {
                order_id,
                fill_quantity: order.quantity,
                fill_price: price,
                fees: order.quantity * price * FEE_RATE,
                status: OrderStatus::Filled,
            });
        }

        let mut balances = self.balances.write().await;
        let held = balances
            .get(&order.symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if order.side == OrderSide::Sell && held < order.quantity {
            return Err(ExchangeError::fatal(format!(
                "insufficient balance: have {held}, need {}",
                order.quantity
            )));
        }

        match order.side {
            OrderSide::Buy => {
                balances.insert(order.symbol.clone(), held + order.quantity);
            }
            OrderSide::Sell => {
                balances.insert(order.symbol.clone(), held - order.quantity);
            }
        }

        Ok(OrderResult {
            order_id,
            fill_quantity: order.quantity,
            fill_price: price,
            fees: order.quantity * price * FEE_RATE,
            status: OrderStatus::Filled,
        })
    }
}
