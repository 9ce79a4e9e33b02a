use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
    Pending,
}

/// Immutable point-in-time record of balances, prices and totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub balances: HashMap<String, Decimal>,
    pub prices: HashMap<String, Decimal>,
    pub total_usd: Decimal,
    pub reason: String,
}

impl Snapshot {
    pub fn new(
        balances: HashMap<String, Decimal>,
        prices: HashMap<String, Decimal>,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let total_usd = portfolio_value_usd(&balances, &prices);
        Self {
            timestamp,
            balances,
            prices,
            total_usd,
            reason: reason.into(),
        }
    }

    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn price(&self, asset: &str) -> Option<Decimal> {
        self.prices.get(asset).copied()
    }
}

/// Sum of quantity * price over every asset with a known price.
pub fn portfolio_value_usd(
    balances: &HashMap<String, Decimal>,
    prices: &HashMap<String, Decimal>,
) -> Decimal {
    balances
        .iter()
        .filter_map(|(asset, qty)| prices.get(asset).map(|p| *qty * *p))
        .sum()
}

/// One point of the rolling spot-price series (retained 24h).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Exchange-side lock on an asset backing an external loan.
///
/// The record set is replaced wholesale each refresh; it is never additive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralRecord {
    pub asset: String,
    pub locked: Decimal,
    /// Loan-to-value in 0..1.
    pub ltv: Decimal,
    pub health: Decimal,
}

/// Per-asset protected quantity floor. Never auto-decremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub asset: String,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub fill_quantity: Decimal,
    pub fill_price: Decimal,
    pub fees: Decimal,
    pub status: OrderStatus,
}

/// Global halt flag. When enabled nothing executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitch {
    pub enabled: bool,
    pub reason: Option<String>,
    pub set_by: Option<String>,
    pub set_at: Option<DateTime<Utc>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self {
            enabled: false,
            reason: None,
            set_by: None,
            set_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_portfolio_value_skips_unpriced_assets() {
        let mut balances = HashMap::new();
        balances.insert("BTC".to_string(), dec!(0.5));
        balances.insert("MYSTERY".to_string(), dec!(1000));

        let mut prices = HashMap::new();
        prices.insert("BTC".to_string(), dec!(70000));

        assert_eq!(portfolio_value_usd(&balances, &prices), dec!(35000));
    }

    #[test]
    fn test_snapshot_totals_on_construction() {
        let mut balances = HashMap::new();
        balances.insert("XRP".to_string(), dec!(100));
        let mut prices = HashMap::new();
        prices.insert("XRP".to_string(), dec!(2.5));

        let snap = Snapshot::new(balances, prices, "scheduled", Utc::now());
        assert_eq!(snap.total_usd, dec!(250));
        assert_eq!(snap.balance("XRP"), dec!(100));
        assert_eq!(snap.balance("BTC"), Decimal::ZERO);
    }
}
