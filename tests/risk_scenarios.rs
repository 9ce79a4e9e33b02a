//! End-to-end guardrail scenarios: baseline clamp, collateral lock,
//! kill-switch halt, and the velocity throttle.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::time::Duration;

use coinward::domain::approvals::ApprovalStatus;
use coinward::domain::events::EventKind;
use coinward::domain::objectives::Objectives;
use coinward::domain::types::{Baseline, CollateralRecord, KillSwitch};

use common::{TestOptions, build, exit_rule};

async fn set_baseline(app: &common::TestApp, asset: &str, quantity: rust_decimal::Decimal) {
    let set = app.stores.set().await;
    set.baselines
        .upsert(&Baseline {
            asset: asset.to_string(),
            quantity,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
}

fn auto_execute_btc() -> Objectives {
    let mut objectives = Objectives::default();
    objectives.core_assets.get_mut("BTC").unwrap().auto_execute = true;
    objectives.approvals_required.large_trade_usd = dec!(50000);
    objectives
}

/// Scenario: profit-take respects the baseline. A 50% exit of 0.8 BTC
/// proposes 0.4, but only 0.3 sits above the 0.5 floor.
#[tokio::test]
async fn profit_take_clamped_to_baseline() {
    let app = build(TestOptions::default()).await;
    app.seed_portfolio(&[("BTC", dec!(0.8), dec!(70000))]).await;
    set_baseline(&app, "BTC", dec!(0.5)).await;
    app.save_objectives(&auto_execute_btc()).await;
    app.add_rule(&exit_rule("BTC", dec!(0.5))).await;

    let report = app.tick.run_tick(false).await.unwrap();
    assert_eq!(report.intents, 1);
    assert_eq!(report.accepted, 1);

    // Auto-executed (dry-run) on a background task.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let set = app.stores.set().await;
    let executions = set.executions.recent(10).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].quantity, dec!(0.3));
    assert!(executions[0].dry_run);
}

/// Scenario: collateral-locked BTC cannot be sold. free = 0.2 < 0.5
/// requested, so the intent dies with the collateral chain and no
/// execution.
#[tokio::test]
async fn collateral_locked_btc_rejected() {
    let app = build(TestOptions::default()).await;
    app.exchange
        .set_collateral(vec![CollateralRecord {
            asset: "BTC".to_string(),
            locked: dec!(1.8),
            ltv: dec!(0.5),
            health: dec!(2),
        }])
        .await;
    app.seed_portfolio(&[("BTC", dec!(2.0), dec!(70000))]).await;
    set_baseline(&app, "BTC", dec!(0.1)).await;
    app.add_rule(&exit_rule("BTC", dec!(0.25))).await;

    let sub = app.bus.subscribe().unwrap();
    let report = app.tick.run_tick(false).await.unwrap();
    assert_eq!(report.intents, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.accepted, 0);

    let set = app.stores.set().await;
    assert!(set.executions.recent(10).await.unwrap().is_empty());

    // The rejection surfaces as a risk_blocked warning with the chain.
    loop {
        let event = sub.recv().await;
        if event.kind == EventKind::Alert && event.data["alert"] == "risk_blocked" {
            assert_eq!(event.data["severity"], "warning");
            let chain = event.data["detail"]["chain"].as_array().unwrap();
            assert_eq!(
                chain.last().unwrap().as_str().unwrap(),
                "collateralProtection: free=0.2 < requested=0.5"
            );
            break;
        }
    }
}

/// Scenario: the kill-switch halts everything. No intents are produced
/// and approved-but-unexecuted approvals are parked as deferred.
#[tokio::test]
async fn kill_switch_halts_everything() {
    let app = build(TestOptions::default()).await;
    app.seed_portfolio(&[("BTC", dec!(0.8), dec!(70000))]).await;
    set_baseline(&app, "BTC", dec!(0.1)).await;
    app.add_rule(&exit_rule("BTC", dec!(0.5))).await;

    // A pending approval and an approved one exist before the halt.
    let pending = app
        .workflow
        .submit_intent(&coinward::domain::intent::TradeIntent {
            rule_id: 1,
            rule_version: 1,
            symbol: "DOGE".to_string(),
            side: coinward::domain::types::OrderSide::Sell,
            quantity: dec!(10),
            price: dec!(0.1),
            reason: "manual queue".to_string(),
            dry_run: true,
            collateral: vec![],
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let set = app.stores.set().await;
    let mut approved = set.approvals.get(pending.id).await.unwrap().unwrap();
    approved
        .transition(ApprovalStatus::Approved, Some("owner"))
        .unwrap();
    set.approvals.save(&approved).await.unwrap();

    // Enable the switch, then defer whatever was approved.
    let ks = KillSwitch {
        enabled: true,
        reason: Some("test".to_string()),
        set_by: Some("owner".to_string()),
        set_at: Some(Utc::now()),
    };
    set.kill_switch.save(&ks).await.unwrap();
    app.workflow.defer_unexecuted().await.unwrap();

    let report = app.tick.run_tick(false).await.unwrap();
    assert_eq!(report.intents, 0);
    assert_eq!(report.rules_evaluated, 1);

    let parked = set.approvals.get(pending.id).await.unwrap().unwrap();
    assert_eq!(parked.status, ApprovalStatus::Deferred);
    assert!(set.executions.recent(10).await.unwrap().is_empty());
}

/// Scenario: the global velocity throttle. Five executions inside the
/// window block the sixth; once they age out the door reopens.
#[tokio::test]
async fn velocity_throttle_window() {
    let app = build(TestOptions::default()).await;
    app.seed_portfolio(&[("BTC", dec!(10), dec!(70000))]).await;
    set_baseline(&app, "BTC", dec!(0.1)).await;
    app.save_objectives(&auto_execute_btc()).await;
    app.add_rule(&exit_rule("BTC", dec!(0.01))).await;

    // Five executions 55 minutes ago, spread over different assets.
    let recent = Utc::now() - ChronoDuration::minutes(55);
    for i in 0..5 {
        app.risk.record_execution(recent, &format!("ASSET{i}"), Some(100 + i));
    }

    let report = app.tick.run_tick(false).await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.accepted, 0);

    // Same setup but with the window already drained.
    let app = build(TestOptions::default()).await;
    app.seed_portfolio(&[("BTC", dec!(10), dec!(70000))]).await;
    set_baseline(&app, "BTC", dec!(0.1)).await;
    app.save_objectives(&auto_execute_btc()).await;
    app.add_rule(&exit_rule("BTC", dec!(0.01))).await;

    let stale = Utc::now() - ChronoDuration::minutes(61);
    for i in 0..5 {
        app.risk.record_execution(stale, &format!("ASSET{i}"), Some(100 + i));
    }

    let report = app.tick.run_tick(false).await.unwrap();
    assert_eq!(report.rejected, 0);
    assert_eq!(report.accepted, 1);
}
