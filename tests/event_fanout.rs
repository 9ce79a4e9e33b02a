//! Event bus fan-out properties: per-topic ordering, backpressure
//! shedding, and the subscriber cap.

use serde_json::json;

use coinward::domain::events::{AlertKind, BusEvent, EventKind, Severity};
use coinward::infrastructure::event_bus::EventBus;

/// Frames of one topic arrive at one subscriber in publish order, even
/// interleaved with other topics.
#[tokio::test]
async fn per_topic_ordering_is_monotone() {
    let bus = EventBus::new();
    let sub = bus.subscribe().unwrap();

    for n in 0..20 {
        bus.publish(BusEvent::new(EventKind::PriceUpdate, json!({ "seq": n })));
        bus.publish(BusEvent::new(
            EventKind::PortfolioUpdated,
            json!({ "seq": n }),
        ));
    }

    let mut last_price_seq = -1i64;
    let mut last_portfolio_seq = -1i64;
    for _ in 0..40 {
        let event = sub.recv().await;
        let seq = event.data["seq"].as_i64().unwrap();
        match event.kind {
            EventKind::PriceUpdate => {
                assert!(seq > last_price_seq, "price ordering violated");
                last_price_seq = seq;
            }
            EventKind::PortfolioUpdated => {
                assert!(seq > last_portfolio_seq, "portfolio ordering violated");
                last_portfolio_seq = seq;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

/// Two subscribers each get their own complete, ordered stream.
#[tokio::test]
async fn subscribers_are_independent() {
    let bus = EventBus::new();
    let sub_a = bus.subscribe().unwrap();
    let sub_b = bus.subscribe().unwrap();

    for n in 0..5 {
        bus.publish(BusEvent::new(EventKind::PriceUpdate, json!({ "seq": n })));
    }

    for n in 0..5 {
        assert_eq!(sub_a.recv().await.data["seq"], n);
    }
    for n in 0..5 {
        assert_eq!(sub_b.recv().await.data["seq"], n);
    }
}

/// A slow subscriber sheds oldest non-critical frames, keeps critical
/// alerts, and learns the drop count.
#[tokio::test]
async fn backpressure_keeps_critical_frames() {
    let bus = EventBus::with_limits(10, 4);
    let sub = bus.subscribe().unwrap();

    bus.publish(BusEvent::alert(
        AlertKind::CircuitBreakerTripped,
        Severity::Critical,
        "tripped",
    ));
    for n in 0..10 {
        bus.publish(BusEvent::new(EventKind::PriceUpdate, json!({ "seq": n })));
    }

    let first = sub.recv().await;
    assert_eq!(first.kind, EventKind::Dropped);
    assert!(first.data["count"].as_u64().unwrap() > 0);

    let mut kinds = Vec::new();
    while let Some(event) = sub.try_recv() {
        kinds.push((event.kind, event.critical));
    }
    assert!(kinds.iter().any(|(_, critical)| *critical), "critical survived");
    // Newest non-critical frames survive the shedding.
    assert!(kinds.iter().any(|(kind, _)| *kind == EventKind::PriceUpdate));
}

/// The subscriber cap answers `None` (HTTP maps this to 503) and slots
/// free on drop.
#[tokio::test]
async fn subscriber_cap_and_release() {
    let bus = EventBus::with_limits(2, 8);
    let a = bus.subscribe().unwrap();
    let _b = bus.subscribe().unwrap();
    assert!(bus.subscribe().is_none());

    drop(a);
    assert!(bus.subscribe().is_some());
}
