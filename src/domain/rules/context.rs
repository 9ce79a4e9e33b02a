//! Per-tick evaluation context.
//!
//! Built once at the top of a tick from the live stores, then shared
//! read-only across every rule. Indicator values are memoized per
//! (kind, symbol, params) so repeated references inside one tick cost one
//! computation. The context is used strictly within a tick (no awaits
//! cross it), which is what makes the interior-mutability caches safe.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::cell::RefCell;
use std::collections::HashMap;

use crate::domain::objectives::Objectives;
use crate::domain::rules::dsl::{IndicatorKind, IndicatorParams, TriggerEvent};
use crate::domain::rules::expr::ExprScope;
use crate::domain::rules::indicators;
use crate::domain::types::{CollateralRecord, PricePoint, portfolio_value_usd};

type IndicatorKey = (IndicatorKind, String, Option<u32>, Option<u32>, Option<u32>, Option<u32>);

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorLookup {
    Value(f64),
    /// Not enough history; condition is simply false.
    Insufficient,
    /// NaN or infinite output; condition is false and an anomaly is raised.
    Anomalous,
}

pub struct EvalContext {
    pub now: DateTime<Utc>,
    pub balances: HashMap<String, Decimal>,
    pub prices: HashMap<String, Decimal>,
    /// Rolling per-symbol series, ascending by time (24h retention).
    pub price_series: HashMap<String, Vec<PricePoint>>,
    pub baselines: HashMap<String, Decimal>,
    pub objectives: Objectives,
    pub collateral: Vec<CollateralRecord>,
    pub last_fires: HashMap<i64, DateTime<Utc>>,
    /// Trigger events observed since the previous tick.
    pub pending_events: Vec<TriggerEvent>,
    pub kill_switch: bool,
    pub dry_run: bool,

    indicator_cache: RefCell<HashMap<IndicatorKey, IndicatorLookup>>,
    anomalies: RefCell<Vec<String>>,
}

impl EvalContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now: DateTime<Utc>,
        balances: HashMap<String, Decimal>,
        prices: HashMap<String, Decimal>,
        price_series: HashMap<String, Vec<PricePoint>>,
        baselines: HashMap<String, Decimal>,
        objectives: Objectives,
        collateral: Vec<CollateralRecord>,
        last_fires: HashMap<i64, DateTime<Utc>>,
        pending_events: Vec<TriggerEvent>,
        kill_switch: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            now,
            balances,
            prices,
            price_series,
            baselines,
            objectives,
            collateral,
            last_fires,
            pending_events,
            kill_switch,
            dry_run,
            indicator_cache: RefCell::new(HashMap::new()),
            anomalies: RefCell::new(Vec::new()),
        }
    }

    pub fn balance(&self, symbol: &str) -> Decimal {
        self.balances.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    pub fn baseline(&self, symbol: &str) -> Decimal {
        self.baselines.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn locked(&self, symbol: &str) -> Decimal {
        self.collateral
            .iter()
            .filter(|c| c.asset == symbol)
            .map(|c| c.locked)
            .sum()
    }

    /// Quantity available for sale: total minus collateral-locked.
    pub fn free(&self, symbol: &str) -> Decimal {
        (self.balance(symbol) - self.locked(symbol)).max(Decimal::ZERO)
    }

    pub fn portfolio_value(&self) -> Decimal {
        portfolio_value_usd(&self.balances, &self.prices)
    }

    /// Fractional price change over the trailing window, from the rolling
    /// series. `None` when the window has no starting point.
    pub fn price_change_pct(&self, symbol: &str, window_mins: i64) -> Option<Decimal> {
        let series = self.price_series.get(symbol)?;
        let cutoff = self.now - Duration::minutes(window_mins);

        // Oldest point inside the window is the reference price.
        let start = series.iter().find(|p| p.timestamp >= cutoff)?;
        let end = series.last()?;
        if start.price.is_zero() {
            return None;
        }
        Some((end.price - start.price) / start.price)
    }

    /// Memoized indicator evaluation over the symbol's close series.
    pub fn indicator(
        &self,
        kind: IndicatorKind,
        symbol: &str,
        params: &IndicatorParams,
    ) -> IndicatorLookup {
        let key: IndicatorKey = (
            kind,
            symbol.to_string(),
            params.period,
            params.fast,
            params.slow,
            params.signal,
        );
        if let Some(cached) = self.indicator_cache.borrow().get(&key) {
            return cached.clone();
        }

        let closes: Vec<f64> = self
            .price_series
            .get(symbol)
            .map(|series| {
                series
                    .iter()
                    .filter_map(|p| p.price.to_f64())
                    .collect()
            })
            .unwrap_or_default();

        let result = match indicators::compute(kind, params, &closes) {
            None => IndicatorLookup::Insufficient,
            Some(v) if !v.is_finite() => {
                self.anomalies
                    .borrow_mut()
                    .push(format!("{kind:?} on {symbol} produced a non-finite value"));
                IndicatorLookup::Anomalous
            }
            Some(v) => IndicatorLookup::Value(v),
        };

        self.indicator_cache.borrow_mut().insert(key, result.clone());
        result
    }

    /// Anomalies recorded during this tick (drained by the engine).
    pub fn take_anomalies(&self) -> Vec<String> {
        std::mem::take(&mut self.anomalies.borrow_mut())
    }
}

impl ExprScope for EvalContext {
    fn lookup(&self, name: &str) -> Option<Decimal> {
        if name == "portfolio_usd" {
            return Some(self.portfolio_value());
        }
        let (prefix, symbol) = name.split_once('.')?;
        match prefix {
            "price" => self.price(symbol),
            "balance" => Some(self.balance(symbol)),
            "baseline" => Some(self.baseline(symbol)),
            "free" => Some(self.free(symbol)),
            _ => None,
        }
    }
}

/// Decimal view of an indicator value, for comparator checks.
pub fn indicator_decimal(lookup: &IndicatorLookup) -> Option<Decimal> {
    match lookup {
        IndicatorLookup::Value(v) => Decimal::from_f64(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(symbol: &str, prices: &[(i64, Decimal)], now: DateTime<Utc>) -> Vec<PricePoint> {
        prices
            .iter()
            .map(|(mins_ago, price)| PricePoint {
                symbol: symbol.to_string(),
                price: *price,
                timestamp: now - Duration::minutes(*mins_ago),
            })
            .collect()
    }

    fn context() -> EvalContext {
        let now = Utc::now();
        let mut balances = HashMap::new();
        balances.insert("BTC".to_string(), dec!(0.8));
        let mut prices = HashMap::new();
        prices.insert("BTC".to_string(), dec!(70000));
        let mut price_series = HashMap::new();
        price_series.insert(
            "BTC".to_string(),
            series("BTC", &[(120, dec!(60000)), (60, dec!(65000)), (0, dec!(70000))], now),
        );
        let mut baselines = HashMap::new();
        baselines.insert("BTC".to_string(), dec!(0.5));

        EvalContext::new(
            now,
            balances,
            prices,
            price_series,
            baselines,
            Objectives::default(),
            vec![CollateralRecord {
                asset: "BTC".to_string(),
                locked: dec!(0.3),
                ltv: dec!(0.5),
                health: dec!(2),
            }],
            HashMap::new(),
            vec![],
            false,
            true,
        )
    }

    #[test]
    fn test_free_subtracts_locked() {
        let ctx = context();
        assert_eq!(ctx.free("BTC"), dec!(0.5));
        assert_eq!(ctx.free("XRP"), Decimal::ZERO);
    }

    #[test]
    fn test_price_change_pct_window() {
        let ctx = context();
        // 90-minute window starts at the 65000 point: (70000-65000)/65000
        let change = ctx.price_change_pct("BTC", 90).unwrap();
        assert!((change - dec!(0.0769)).abs() < dec!(0.001));
        assert_eq!(ctx.price_change_pct("DOGE", 90), None);
    }

    #[test]
    fn test_expr_scope_lookup() {
        let ctx = context();
        assert_eq!(ctx.lookup("balance.BTC"), Some(dec!(0.8)));
        assert_eq!(ctx.lookup("free.BTC"), Some(dec!(0.5)));
        assert_eq!(ctx.lookup("portfolio_usd"), Some(dec!(56000)));
        assert_eq!(ctx.lookup("nonsense.BTC"), None);
    }

    #[test]
    fn test_indicator_memoized_per_tick() {
        let ctx = context();
        let params = IndicatorParams {
            period: Some(2),
            ..Default::default()
        };
        let first = ctx.indicator(IndicatorKind::Sma, "BTC", &params);
        let second = ctx.indicator(IndicatorKind::Sma, "BTC", &params);
        assert_eq!(first, second);
        assert!(matches!(first, IndicatorLookup::Value(_)));
    }
}
