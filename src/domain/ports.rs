use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::errors::ExchangeError;
use crate::domain::types::{CollateralRecord, OrderRequest, OrderResult};

/// The narrow exchange surface the core depends on.
///
/// Any implementation satisfying these operations suffices; live REST or
/// WebSocket connectors live outside this crate. The client classifies its
/// own failures as transient or fatal via `ExchangeError`.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_all_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    async fn get_spot_prices(
        &self,
        assets: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// May be empty when no loan is open.
    async fn get_collateral(&self) -> Result<Vec<CollateralRecord>, ExchangeError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResult, ExchangeError>;
}
