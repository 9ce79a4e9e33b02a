//! Portfolio ingestion and snapshot bookkeeping.
//!
//! The single writer for snapshots, the rolling price series, collateral
//! and baselines. The scheduler drives it periodically; the executor and
//! the HTTP layer call into it for forced refreshes and manual snapshots.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::application::stores::Stores;
use crate::application::tick_service::TriggerQueue;
use crate::domain::events::{AlertKind, AlertRecord, BusEvent, EventKind, Severity};
use crate::domain::ports::ExchangeClient;
use crate::domain::rules::dsl::TriggerEvent;
use crate::domain::types::{Baseline, PricePoint, Snapshot};
use crate::infrastructure::event_bus::EventBus;

/// Hourly move beyond this fraction counts as a price shock.
const PRICE_SHOCK_PCT: Decimal = dec!(0.10);

/// Rolling price series retention.
const PRICE_RETENTION_HOURS: i64 = 24;

/// Default XRP floor seeded on bootstrap.
const XRP_BOOTSTRAP_FLOOR: Decimal = dec!(10);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub asset: String,
    pub from: Decimal,
    pub to: Decimal,
    pub delta: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioChanges {
    pub from_timestamp: Option<DateTime<Utc>>,
    pub to_timestamp: DateTime<Utc>,
    pub total_usd_from: Decimal,
    pub total_usd_to: Decimal,
    pub changes: Vec<BalanceChange>,
}

#[derive(Clone)]
pub struct PortfolioService {
    exchange: Arc<dyn ExchangeClient>,
    stores: Stores,
    bus: EventBus,
    triggers: TriggerQueue,
    /// Most recent snapshot, survives store outages.
    last_snapshot: Arc<RwLock<Option<Snapshot>>>,
}

impl PortfolioService {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        stores: Stores,
        bus: EventBus,
        triggers: TriggerQueue,
    ) -> Self {
        Self {
            exchange,
            stores,
            bus,
            triggers,
            last_snapshot: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn cached_snapshot(&self) -> Option<Snapshot> {
        self.last_snapshot.read().await.clone()
    }

    /// One full portfolio cycle: balances, prices, collateral, snapshot.
    /// Failures surface as a `data_fetch_error` alert and leave every
    /// store untouched; the next tick retries.
    pub async fn refresh_portfolio(&self, reason: &str) -> Result<Snapshot> {
        let result = self.try_refresh(reason).await;
        if let Err(err) = &result {
            warn!(error = %err, "portfolio refresh failed");
            self.bus.publish(BusEvent::alert(
                AlertKind::DataFetchError,
                Severity::Warning,
                format!("portfolio refresh failed: {err:#}"),
            ));
        }
        result
    }

    async fn try_refresh(&self, reason: &str) -> Result<Snapshot> {
        let balances = self
            .exchange
            .get_all_balances()
            .await
            .context("balance fetch")?;
        let assets: Vec<String> = balances.keys().cloned().collect();
        let prices = self
            .exchange
            .get_spot_prices(&assets)
            .await
            .context("price fetch")?;
        let collateral = self
            .exchange
            .get_collateral()
            .await
            .context("collateral fetch")?;

        let snapshot = Snapshot::new(balances, prices, reason, Utc::now());
        let set = self.stores.set().await;

        // Bootstrap: first snapshot ever seeds the protected floors.
        let is_bootstrap = set.snapshots.count().await.unwrap_or(0) == 0;

        set.snapshots.save(&snapshot).await?;
        set.collateral.replace_all(&collateral).await?;

        if is_bootstrap {
            self.seed_baselines(&snapshot).await?;
        } else {
            self.assert_baselines(&snapshot).await?;
        }

        *self.last_snapshot.write().await = Some(snapshot.clone());
        self.bus.publish(BusEvent::new(
            EventKind::PortfolioUpdated,
            json!({
                "totalUsd": snapshot.total_usd,
                "reason": snapshot.reason,
                "assets": snapshot.balances.len(),
            }),
        ));

        Ok(snapshot)
    }

    async fn seed_baselines(&self, snapshot: &Snapshot) -> Result<()> {
        let set = self.stores.set().await;
        let btc = Baseline {
            asset: "BTC".to_string(),
            quantity: snapshot.balance("BTC"),
            updated_at: snapshot.timestamp,
        };
        let xrp = Baseline {
            asset: "XRP".to_string(),
            quantity: snapshot.balance("XRP").max(XRP_BOOTSTRAP_FLOOR),
            updated_at: snapshot.timestamp,
        };
        set.baselines.upsert(&btc).await?;
        set.baselines.upsert(&xrp).await?;
        info!(btc = %btc.quantity, xrp = %xrp.quantity, "baselines seeded from bootstrap snapshot");
        Ok(())
    }

    /// A holding below its protected floor means a sell slipped past the
    /// decision-time check (a race the pipeline cannot fully exclude).
    /// That is a critical condition, re-asserted on every snapshot.
    async fn assert_baselines(&self, snapshot: &Snapshot) -> Result<()> {
        let set = self.stores.set().await;
        for baseline in set.baselines.all().await? {
            let held = snapshot.balance(&baseline.asset);
            if held < baseline.quantity {
                let message = format!(
                    "{} holding {held} fell below baseline {}",
                    baseline.asset, baseline.quantity
                );
                self.bus.publish(BusEvent::alert(
                    AlertKind::Risk,
                    Severity::Critical,
                    message.clone(),
                ));
                set.alerts
                    .save(&AlertRecord {
                        alert: AlertKind::Risk,
                        severity: Severity::Critical,
                        message,
                        timestamp: snapshot.timestamp,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Persist a manually supplied snapshot (integrations push these).
    /// Deposits raise baselines for opted-in core assets and queue a
    /// deposit trigger for event rules.
    pub async fn manual_snapshot(
        &self,
        balances: HashMap<String, Decimal>,
        prices: HashMap<String, Decimal>,
        reason: &str,
        is_deposit: bool,
        deposit_amounts: HashMap<String, Decimal>,
    ) -> Result<Snapshot> {
        let snapshot = Snapshot::new(balances, prices, reason, Utc::now());
        let set = self.stores.set().await;
        set.snapshots.save(&snapshot).await?;
        *self.last_snapshot.write().await = Some(snapshot.clone());

        if is_deposit {
            self.apply_deposit(&deposit_amounts).await?;
            self.triggers.push(TriggerEvent::Deposit);
        }

        self.bus.publish(BusEvent::new(
            EventKind::PortfolioSnapshot,
            json!({ "reason": snapshot.reason, "totalUsd": snapshot.total_usd }),
        ));
        Ok(snapshot)
    }

    /// Baselines only ever move up here; decreases need an explicit owner
    /// override through the objectives endpoint.
    async fn apply_deposit(&self, amounts: &HashMap<String, Decimal>) -> Result<()> {
        let set = self.stores.set().await;
        let objectives = set.objectives.load().await?.unwrap_or_default();

        for (asset, amount) in amounts {
            if *amount <= Decimal::ZERO {
                continue;
            }
            let Some(policy) = objectives.core_assets.get(asset) else {
                continue;
            };
            if !policy.auto_increment_on_deposit {
                continue;
            }
            let current = set
                .baselines
                .get(asset)
                .await?
                .map(|b| b.quantity)
                .unwrap_or(Decimal::ZERO);
            let raised = Baseline {
                asset: asset.clone(),
                quantity: current + *amount,
                updated_at: Utc::now(),
            };
            set.baselines.upsert(&raised).await?;
            info!(asset = %asset, from = %current, to = %raised.quantity, "baseline raised on deposit");
        }
        Ok(())
    }

    /// One price cycle: append to the rolling series, detect shocks,
    /// prune beyond retention.
    pub async fn refresh_prices(&self) -> Result<()> {
        let assets = match self.cached_snapshot().await {
            Some(snapshot) => snapshot.balances.keys().cloned().collect::<Vec<_>>(),
            None => vec!["BTC".to_string(), "XRP".to_string()],
        };

        let prices = match self.exchange.get_spot_prices(&assets).await {
            Ok(prices) => prices,
            Err(err) => {
                self.bus.publish(BusEvent::alert(
                    AlertKind::DataFetchError,
                    Severity::Warning,
                    format!("price refresh failed: {err}"),
                ));
                return Err(err.into());
            }
        };

        let now = Utc::now();
        let points: Vec<PricePoint> = prices
            .iter()
            .map(|(symbol, price)| PricePoint {
                symbol: symbol.clone(),
                price: *price,
                timestamp: now,
            })
            .collect();

        let set = self.stores.set().await;
        set.prices.append(&points).await?;
        set.prices
            .prune_before(now - Duration::hours(PRICE_RETENTION_HOURS))
            .await?;

        for (symbol, price) in &prices {
            if let Some(change) = self.hourly_change(symbol).await?
                && change.abs() > PRICE_SHOCK_PCT
            {
                self.triggers.push(TriggerEvent::PriceShock);
                self.bus.publish(BusEvent::alert_with(
                    AlertKind::Risk,
                    Severity::Warning,
                    format!("{symbol} moved {change:.4} in the last hour"),
                    json!({ "symbol": symbol, "price": price }),
                ));
            }
        }

        self.bus
            .publish(BusEvent::new(EventKind::PriceUpdate, json!(prices)));
        Ok(())
    }

    async fn hourly_change(&self, symbol: &str) -> Result<Option<Decimal>> {
        let set = self.stores.set().await;
        let series = set
            .prices
            .series(symbol, Utc::now() - Duration::hours(1))
            .await?;
        let (Some(first), Some(last)) = (series.first(), series.last()) else {
            return Ok(None);
        };
        if first.price.is_zero() {
            return Ok(None);
        }
        Ok(Some((last.price - first.price) / first.price))
    }

    /// Largest absolute hourly move among held assets; the scheduler uses
    /// it to adapt the portfolio cadence.
    pub async fn realized_volatility(&self) -> Option<Decimal> {
        let snapshot = self.cached_snapshot().await?;
        let mut max_move: Option<Decimal> = None;
        for symbol in snapshot.balances.keys() {
            if let Ok(Some(change)) = self.hourly_change(symbol).await {
                let magnitude = change.abs();
                max_move = Some(max_move.map_or(magnitude, |m| m.max(magnitude)));
            }
        }
        max_move
    }

    /// Per-asset diffs between the newest snapshot and the newest one at
    /// or before `since`.
    pub async fn changes_since(&self, since: DateTime<Utc>) -> Result<Option<PortfolioChanges>> {
        let set = self.stores.set().await;
        let Some(current) = set.snapshots.latest().await? else {
            return Ok(None);
        };
        let reference = set.snapshots.latest_before(since).await?;

        let empty = HashMap::new();
        let ref_balances = reference.as_ref().map(|s| &s.balances).unwrap_or(&empty);

        let mut assets: Vec<String> = current
            .balances
            .keys()
            .chain(ref_balances.keys())
            .cloned()
            .collect();
        assets.sort();
        assets.dedup();

        let changes = assets
            .into_iter()
            .filter_map(|asset| {
                let from = ref_balances.get(&asset).copied().unwrap_or(Decimal::ZERO);
                let to = current.balance(&asset);
                (from != to).then(|| BalanceChange {
                    asset,
                    from,
                    to,
                    delta: to - from,
                })
            })
            .collect();

        Ok(Some(PortfolioChanges {
            from_timestamp: reference.as_ref().map(|s| s.timestamp),
            to_timestamp: current.timestamp,
            total_usd_from: reference.map(|s| s.total_usd).unwrap_or(Decimal::ZERO),
            total_usd_to: current.total_usd,
            changes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::objectives::Objectives;
    use crate::infrastructure::exchange::MockExchange;

    async fn service() -> (PortfolioService, Arc<MockExchange>, Stores, EventBus) {
        let exchange = Arc::new(MockExchange::new());
        let stores = Stores::ephemeral();
        let bus = EventBus::new();
        let triggers = TriggerQueue::new();
        let service = PortfolioService::new(exchange.clone(), stores.clone(), bus.clone(), triggers);
        (service, exchange, stores, bus)
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_baselines() {
        let (service, exchange, stores, _bus) = service().await;
        exchange.set_balance("BTC", dec!(0.8)).await;
        exchange.set_balance("XRP", dec!(5)).await;
        exchange.set_price("BTC", dec!(70000)).await;
        exchange.set_price("XRP", dec!(2)).await;

        service.refresh_portfolio("scheduled").await.unwrap();

        let set = stores.set().await;
        let btc = set.baselines.get("BTC").await.unwrap().unwrap();
        assert_eq!(btc.quantity, dec!(0.8));
        // XRP floor is max(10, balance).
        let xrp = set.baselines.get("XRP").await.unwrap().unwrap();
        assert_eq!(xrp.quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_second_refresh_does_not_reseed() {
        let (service, exchange, stores, _bus) = service().await;
        exchange.set_balance("BTC", dec!(0.8)).await;
        exchange.set_price("BTC", dec!(70000)).await;

        service.refresh_portfolio("scheduled").await.unwrap();
        exchange.set_balance("BTC", dec!(2.0)).await;
        service.refresh_portfolio("scheduled").await.unwrap();

        let set = stores.set().await;
        let btc = set.baselines.get("BTC").await.unwrap().unwrap();
        assert_eq!(btc.quantity, dec!(0.8), "baseline must not follow balance");
    }

    #[tokio::test]
    async fn test_fetch_failure_emits_alert_and_preserves_stores() {
        let (service, exchange, stores, bus) = service().await;
        let sub = bus.subscribe().unwrap();
        exchange.fail_next();

        assert!(service.refresh_portfolio("scheduled").await.is_err());
        assert_eq!(stores.set().await.snapshots.count().await.unwrap(), 0);

        let event = sub.recv().await;
        assert_eq!(event.kind, EventKind::Alert);
        assert_eq!(event.data["alert"], "data_fetch_error");
    }

    #[tokio::test]
    async fn test_baseline_breach_raises_critical_alert() {
        let (service, exchange, stores, bus) = service().await;
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_price("BTC", dec!(70000)).await;
        service.refresh_portfolio("scheduled").await.unwrap();

        // Something slipped below the floor between snapshots.
        exchange.set_balance("BTC", dec!(0.4)).await;
        let sub = bus.subscribe().unwrap();
        service.refresh_portfolio("scheduled").await.unwrap();

        let mut saw_critical = false;
        while let Some(event) = sub.try_recv() {
            if event.critical {
                saw_critical = true;
            }
        }
        assert!(saw_critical);

        let set = stores.set().await;
        assert_eq!(set.alerts.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deposit_raises_baseline_monotonically() {
        let (service, exchange, stores, _bus) = service().await;
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_price("BTC", dec!(70000)).await;
        service.refresh_portfolio("scheduled").await.unwrap();

        let set = stores.set().await;
        set.objectives.save(&Objectives::default()).await.unwrap();

        let mut deposit = HashMap::new();
        deposit.insert("BTC".to_string(), dec!(0.5));
        service
            .manual_snapshot(HashMap::new(), HashMap::new(), "deposit", true, deposit)
            .await
            .unwrap();

        let baseline = set.baselines.get("BTC").await.unwrap().unwrap();
        assert_eq!(baseline.quantity, dec!(1.5));
    }

    #[tokio::test]
    async fn test_changes_since_diffs_assets() {
        let (service, exchange, _stores, _bus) = service().await;
        exchange.set_balance("BTC", dec!(1)).await;
        exchange.set_price("BTC", dec!(70000)).await;
        service.refresh_portfolio("a").await.unwrap();

        let since = Utc::now();
        exchange.set_balance("BTC", dec!(1.4)).await;
        service.refresh_portfolio("b").await.unwrap();

        let changes = service.changes_since(since).await.unwrap().unwrap();
        assert_eq!(changes.changes.len(), 1);
        assert_eq!(changes.changes[0].delta, dec!(0.4));
    }
}
