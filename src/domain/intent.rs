use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{CollateralRecord, OrderSide};

/// A candidate trade proposed by a rule evaluation.
///
/// Intents are transient: each one is either dropped by the risk pipeline,
/// auto-executed, or persisted as an approval. The collateral set seen at
/// decision time travels with the intent so later displays reflect what the
/// pipeline actually evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub rule_id: i64,
    pub rule_version: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Spot price at evaluation time.
    pub price: Decimal,
    /// Human-readable explanation built from the rule name and the passing
    /// conditions; rendered verbatim in approval displays.
    pub reason: String,
    pub dry_run: bool,
    pub collateral: Vec<CollateralRecord>,
    pub created_at: DateTime<Utc>,
}

impl TradeIntent {
    pub fn value_usd(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self
    }
}
