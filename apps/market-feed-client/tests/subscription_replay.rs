//! Subscription Replay Integration Tests
//!
//! Desired subscriptions survive reconnects: each desired symbol is
//! requested exactly once per session, denied and unsubscribed symbols are
//! not restored.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use market_feed_client::{ClientEvent, SendStatus, SubscriptionStatus, Topic};

use common::{
    ScriptedTransport, Step, USER, builder, settle, subscribe_frame, test_clock,
    unsubscribe_frame, wait_for,
};

#[tokio::test(start_paused = true)]
async fn replay_groups_symbols_by_channel_set() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();

    let _ = manager.subscribe(&["MSFT", "AAPL"], &["quotes"]);
    let _ = manager.subscribe(&["TSLA"], &["trades"]);
    manager.connect(USER);

    let mut server = servers.next().await;
    assert_eq!(
        server.next_frame().await,
        subscribe_frame(&["AAPL", "MSFT"], &["quotes"])
    );
    assert_eq!(
        server.next_frame().await,
        subscribe_frame(&["TSLA"], &["trades"])
    );
    settle().await;
    assert!(server.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_unsubscribe_is_sent_and_not_replayed() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let _ = manager.subscribe(&["AAPL", "MSFT"], &["quotes"]);
    assert_eq!(manager.unsubscribe(&["msft"]), Some(SendStatus::Queued));
    manager.connect(USER);

    let mut server = servers.next().await;
    // Queued messages go out before the replay.
    assert_eq!(server.next_frame().await, unsubscribe_frame(&["MSFT"]));
    assert_eq!(
        server.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes"])
    );

    server.push(json!({"type": "unsubscribe_confirmed", "symbols": ["MSFT"]}));
    wait_for(&mut events, |e| matches!(e, ClientEvent::Unsubscribed { .. })).await;

    assert!(manager.registry().get("MSFT").is_none());
    let desired: Vec<String> = manager
        .subscriptions()
        .into_iter()
        .map(|s| s.symbol)
        .collect();
    assert_eq!(desired, vec!["AAPL".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn denied_symbols_are_not_restored() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept, Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let _ = manager.subscribe(&["AAPL", "FAKE"], &["quotes"]);
    manager.connect(USER);

    let mut first = servers.next().await;
    assert_eq!(
        first.next_frame().await,
        subscribe_frame(&["AAPL", "FAKE"], &["quotes"])
    );
    first.confirm(&["AAPL"]);
    first.push(json!({
        "type": "subscription_denied",
        "symbols": ["FAKE"],
        "message": "unknown symbol",
    }));

    let denied =
        wait_for(&mut events, |e| matches!(e, ClientEvent::SubscriptionDenied { .. })).await;
    assert_eq!(
        denied,
        ClientEvent::SubscriptionDenied {
            symbols: vec!["FAKE".to_string()],
            message: Some("unknown symbol".to_string()),
        }
    );
    assert_eq!(
        manager.registry().get("FAKE").unwrap().status,
        SubscriptionStatus::Inactive
    );

    first.close(1011, "server restart");

    let mut second = servers.next().await;
    assert_eq!(
        second.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes"])
    );
    settle().await;
    assert!(second.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_subscribes_are_requested_once() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept, Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let _ = manager.subscribe(&["AAPL"], &["quotes"]);
    let _ = manager.subscribe(&["aapl", " AAPL "], &["QUOTES"]);
    manager.connect(USER);

    let mut first = servers.next().await;
    assert_eq!(
        first.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes"])
    );
    first.confirm(&["AAPL"]);
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::SubscriptionConfirmed { .. })
    })
    .await;

    // Already active with these channels: nothing to send.
    let outcome = manager.subscribe(&["AAPL"], &["quotes"]);
    assert_eq!(outcome.unchanged, vec!["AAPL".to_string()]);
    assert!(outcome.request.is_none());
    settle().await;
    assert!(first.drain().is_empty());

    first.fail("connection reset");

    let mut second = servers.next().await;
    assert_eq!(
        second.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes"])
    );
    settle().await;
    assert!(second.drain().is_empty());
    assert_eq!(manager.subscriptions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn live_subscribe_adds_channels_and_replays_the_union() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept, Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let _ = manager.subscribe(&["AAPL"], &["quotes"]);
    manager.connect(USER);

    let mut first = servers.next().await;
    assert_eq!(
        first.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes"])
    );
    first.confirm(&["AAPL"]);
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::SubscriptionConfirmed { .. })
    })
    .await;

    let outcome = manager.subscribe(&["AAPL"], &["trades"]);
    assert_eq!(outcome.pending, vec!["AAPL".to_string()]);
    assert!(outcome.request.is_some());
    assert_eq!(
        first.next_frame().await,
        subscribe_frame(&["AAPL"], &["trades"])
    );

    first.close(1001, "going away");

    let mut second = servers.next().await;
    assert_eq!(
        second.next_frame().await,
        subscribe_frame(&["AAPL"], &["quotes", "trades"])
    );
}

#[tokio::test(start_paused = true)]
async fn subscriptions_return_to_pending_while_offline() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let _ = manager.subscribe(&["AAPL"], &["quotes"]);
    manager.connect(USER);

    let mut server = servers.next().await;
    let _ = server.next_frame().await;
    server.confirm(&["AAPL"]);
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::SubscriptionConfirmed { .. })
    })
    .await;
    assert_eq!(manager.registry().stats().active, 1);

    manager.disconnect("test").await;

    let stats = manager.registry().stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.pending, 1);
    assert!(!manager.registry().is_live());
}

#[tokio::test(start_paused = true)]
async fn lowercase_symbol_reads_back_everywhere() {
    let (transport, mut servers) = ScriptedTransport::new(&[Step::Accept]);
    let clock = test_clock();
    let manager = builder(&transport, &clock).build();
    let mut events = manager.events().subscribe();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    manager.events().on(Topic::Symbol("aapl".into()), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let _ = manager.subscribe(&["aapl"], &["quotes"]);
    manager.connect(USER);

    let mut server = servers.next().await;
    let _ = server.next_frame().await;
    server.confirm(&["AAPL"]);
    server.quote("AAPL", 150.25);
    wait_for(&mut events, |e| matches!(e, ClientEvent::Data(_))).await;

    assert_eq!(
        manager.registry().get("aapl").unwrap().status,
        SubscriptionStatus::Active
    );
    let cached = manager.cache().get("aapl").unwrap();
    assert_eq!(cached.payload, json!({"price": 150.25}));
    assert!(!manager.cache().is_stale("aapl", Duration::from_secs(5)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
