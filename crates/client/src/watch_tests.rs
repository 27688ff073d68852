// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;

/// Channel pointed at a port nothing listens on.
fn offline_channel() -> InvalidationChannel {
    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
    };
    InvalidationChannel::new("ws://127.0.0.1:1", Arc::new(StompDialer::new()), None, policy)
}

fn recording_listener(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener {
    let log = Arc::clone(log);
    let tag = tag.to_owned();
    Arc::new(move |event: &InvalidationEvent| {
        log.lock().push(format!("{tag}:{}", event.namespace));
    })
}

fn event(namespace: &str) -> InvalidationEvent {
    InvalidationEvent {
        namespace: namespace.to_owned(),
        kind: ChangeKind::Modified,
        scope: InvalidationScope::Namespace,
        tenants: vec![],
    }
}

// ── backoff ───────────────────────────────────────────────────────────────

#[test]
fn backoff_doubles_up_to_cap() {
    let policy = ReconnectPolicy::default();
    let mut delay = policy.initial_backoff;
    let mut seen = vec![];
    for _ in 0..8 {
        seen.push(delay.as_millis());
        delay = policy.next_backoff(delay);
    }
    assert_eq!(seen, vec![100, 200, 400, 800, 1600, 3200, 5000, 5000]);
}

#[test]
fn jitter_stays_within_ten_percent() {
    for _ in 0..100 {
        let d = ReconnectPolicy::jittered(Duration::from_millis(1000));
        assert!(d >= Duration::from_millis(1000));
        assert!(d <= Duration::from_millis(1100));
    }
    assert_eq!(ReconnectPolicy::jittered(Duration::from_millis(5)), Duration::from_millis(5));
}

// ── payload parsing ───────────────────────────────────────────────────────

#[test]
fn payload_without_classifier_is_namespace_wide() -> anyhow::Result<()> {
    let body = r#"{"type":"CREATED","tenants":[{"externalId":"t-1","status":"ACTIVE"}]}"#;
    let event = parse_event("ns-1", body)?;
    assert_eq!(event.namespace, "ns-1");
    assert_eq!(event.kind, ChangeKind::Created);
    assert_eq!(event.scope, InvalidationScope::Namespace);
    assert_eq!(event.tenants.len(), 1);
    assert!(event.tenants[0].is_active());
    Ok(())
}

#[test]
fn payload_with_classifier_is_scoped() -> anyhow::Result<()> {
    let body = r#"{"type":"DELETED","classifier":{"name":"orders","namespace":"ns-1"}}"#;
    let event = parse_event("ns-1", body)?;
    let expected = Classifier::new("orders").with_namespace("ns-1");
    assert_eq!(event.scope, InvalidationScope::Classifier(expected.clone()));
    assert!(event.affects(&expected.clone().with_tenant_id("t-1")));
    assert!(!event.affects(&Classifier::new("payments").with_namespace("ns-1")));
    Ok(())
}

#[test]
fn namespace_event_does_not_affect_other_namespace() -> anyhow::Result<()> {
    let event = parse_event("ns-1", r#"{"type":"MODIFIED"}"#)?;
    assert!(event.affects(&Classifier::new("orders").with_namespace("ns-1")));
    assert!(!event.affects(&Classifier::new("orders").with_namespace("ns-2")));
    Ok(())
}

#[test]
fn unreadable_tenant_is_skipped() -> anyhow::Result<()> {
    let body = r#"{"type":"MODIFIED","tenants":[{"status":"ACTIVE"},{"externalId":"t-2","status":"ACTIVE"}]}"#;
    let event = parse_event("ns-1", body)?;
    assert_eq!(event.kind, ChangeKind::Modified);
    assert_eq!(event.tenants.len(), 1);
    assert_eq!(event.tenants[0].external_id, "t-2");
    Ok(())
}

#[yare::parameterized(
    non_string_value = { r#"{"type":"DELETED","classifier":{"name":7}}"# },
    not_an_object = { r#"{"type":"DELETED","classifier":"orders"}"# },
    tenants_not_a_list = { r#"{"type":"DELETED","tenants":{"externalId":"t-1"}}"# },
)]
fn malformed_extras_fall_back_to_namespace_scope(body: &str) {
    let event = parse_event("ns-1", body);
    assert!(event.is_ok(), "event dropped: {event:?}");
    let Ok(event) = event else { return };
    assert_eq!(event.kind, ChangeKind::Deleted);
    assert_eq!(event.scope, InvalidationScope::Namespace);
    assert!(event.tenants.is_empty());
    assert!(event.affects(&Classifier::new("orders").with_namespace("ns-1")));
}

#[test]
fn unknown_type_is_rejected() {
    assert!(parse_event("ns", r#"{"type":"EXPLODED"}"#).is_err());
    assert!(parse_event("ns", "not json").is_err());
}

// ── subscription routing ──────────────────────────────────────────────────

#[test]
fn subscriptions_route_by_id_then_destination() {
    let mut subs = Subscriptions::default();
    let first = subs.add("ns-a");
    let second = subs.add("ns-b");
    assert_eq!(first.get("id"), Some("sub-0"));
    assert_eq!(second.get("destination"), Some("/channels/tenants/ns-b"));

    let by_id = Frame::new(Command::Message).header("subscription", "sub-1");
    assert_eq!(subs.route(&by_id), Some("ns-b"));

    let by_dest = Frame::new(Command::Message).header("destination", "/channels/tenants/ns-a");
    assert_eq!(subs.route(&by_dest), Some("ns-a"));

    let unknown = Frame::new(Command::Message).header("subscription", "sub-9");
    assert_eq!(subs.route(&unknown), None);
}

#[test]
fn removing_subscription_emits_unsubscribe() {
    let mut subs = Subscriptions::default();
    subs.add("ns-a");
    let frame = subs.remove("ns-a");
    assert_eq!(frame.as_ref().map(|f| f.command), Some(Command::Unsubscribe));
    assert_eq!(frame.as_ref().and_then(|f| f.get("id")), Some("sub-0"));
    assert!(subs.is_empty());
    assert!(subs.remove("ns-a").is_none());
}

#[test]
fn reconcile_follows_the_registry() {
    let mut subs = Subscriptions::default();
    let watched = vec!["ns-a".to_owned(), "ns-b".to_owned()];
    let frames = subs.reconcile(&watched);
    let destinations: Vec<_> = frames.iter().filter_map(|f| f.get("destination")).collect();
    assert_eq!(destinations, vec!["/channels/tenants/ns-a", "/channels/tenants/ns-b"]);

    // Unchanged registry: nothing to send.
    assert!(subs.reconcile(&watched).is_empty());

    let frames = subs.reconcile(&["ns-b".to_owned(), "ns-c".to_owned()]);
    let commands: Vec<_> = frames.iter().map(|f| f.command).collect();
    assert_eq!(commands, vec![Command::Unsubscribe, Command::Subscribe]);
    assert_eq!(frames[0].get("id"), Some("sub-0"));
    assert_eq!(frames[1].get("destination"), Some("/channels/tenants/ns-c"));

    let frames = subs.reconcile(&[]);
    assert_eq!(frames.len(), 2);
    assert!(subs.is_empty());
}

// ── registry ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_is_idempotent_per_listener() -> anyhow::Result<()> {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));
    let listener = recording_listener(&log, "a");

    let first = channel.subscribe("ns-1", Arc::clone(&listener))?;
    let again = channel.subscribe("ns-1", Arc::clone(&listener))?;
    let other_ns = channel.subscribe("ns-2", Arc::clone(&listener))?;
    assert_eq!(first, again);
    assert_ne!(first, other_ns);
    assert_eq!(channel.namespaces(), vec!["ns-1".to_owned(), "ns-2".to_owned()]);

    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn dispatch_follows_registration_order() -> anyhow::Result<()> {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));
    channel.subscribe("ns-1", recording_listener(&log, "first"))?;
    channel.subscribe("ns-2", recording_listener(&log, "other"))?;
    channel.subscribe("ns-1", recording_listener(&log, "second"))?;

    channel.worker.shared.dispatch(&event("ns-1"));
    assert_eq!(*log.lock(), vec!["first:ns-1".to_owned(), "second:ns-1".to_owned()]);

    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn unsubscribe_drops_namespace_with_last_listener() -> anyhow::Result<()> {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));
    let a = channel.subscribe("ns-1", recording_listener(&log, "a"))?;
    let b = channel.subscribe("ns-1", recording_listener(&log, "b"))?;

    assert!(channel.unsubscribe(a));
    assert_eq!(channel.namespaces(), vec!["ns-1".to_owned()]);
    assert!(channel.unsubscribe(b));
    assert!(channel.namespaces().is_empty());
    assert!(!channel.unsubscribe(b));

    channel.worker.shared.dispatch(&event("ns-1"));
    assert!(log.lock().is_empty());

    channel.close().await;
    Ok(())
}

#[test]
fn subscribe_outside_runtime_registers_nothing() {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));

    let res = channel.subscribe("ns-1", recording_listener(&log, "a"));
    assert!(matches!(res, Err(MaasError::Connection { .. })));
    assert!(channel.namespaces().is_empty());
    assert!(channel.task.lock().is_none());

    channel.worker.shared.dispatch(&event("ns-1"));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn close_is_terminal() -> anyhow::Result<()> {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));
    channel.subscribe("ns-1", recording_listener(&log, "a"))?;

    channel.close().await;
    assert!(channel.is_closed());
    assert_eq!(channel.state(), ConnectionState::Closed);
    assert!(channel.namespaces().is_empty());

    channel.worker.shared.dispatch(&event("ns-1"));
    assert!(log.lock().is_empty());
    assert!(channel.subscribe("ns-1", recording_listener(&log, "b")).is_err());

    // Second close is a no-op.
    channel.close().await;
    assert!(channel.task.lock().is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribe_racing_close_never_outlives_it() -> anyhow::Result<()> {
    let channel = Arc::new(offline_channel());
    let log = Arc::new(Mutex::new(vec![]));

    let mut racers = Vec::new();
    for i in 0..32 {
        let channel = Arc::clone(&channel);
        let listener = recording_listener(&log, &format!("l{i}"));
        racers.push(tokio::spawn(async move {
            channel.subscribe(&format!("ns-{}", i % 4), listener).is_ok()
        }));
    }
    channel.close().await;
    for racer in racers {
        racer.await?;
    }

    assert!(channel.namespaces().is_empty());
    assert!(channel.task.lock().is_none());
    assert_eq!(channel.state(), ConnectionState::Closed);
    assert!(channel.subscribe("ns-0", recording_listener(&log, "late")).is_err());
    Ok(())
}

#[tokio::test]
async fn unwatched_channel_stays_idle() -> anyhow::Result<()> {
    let channel = offline_channel();
    let log = Arc::new(Mutex::new(vec![]));
    let id = channel.subscribe("ns-1", recording_listener(&log, "a"))?;
    assert!(channel.unsubscribe(id));

    let mut states = channel.state_changes();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await??;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = states.borrow_and_update();

    // No reconnect attempts while nothing is watched.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!states.has_changed()?);
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    channel.close().await;
    Ok(())
}

#[tokio::test]
async fn failed_handshakes_are_retried() -> anyhow::Result<()> {
    // Accept and immediately drop every connection.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let counter = Arc::clone(&accepts);
    let server = tokio::spawn(async move {
        while let Ok((conn, _)) = listener.accept().await {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            drop(conn);
        }
    });

    let policy = ReconnectPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
    };
    let channel = InvalidationChannel::new(
        &format!("ws://{addr}"),
        Arc::new(StompDialer::new()),
        None,
        policy,
    );
    channel.subscribe("ns-1", recording_listener(&Arc::new(Mutex::new(vec![])), "a"))?;

    tokio::time::timeout(Duration::from_secs(5), async {
        while accepts.load(std::sync::atomic::Ordering::Relaxed) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_ne!(channel.state(), ConnectionState::Subscribed);

    channel.close().await;
    assert_eq!(channel.state(), ConnectionState::Closed);
    server.abort();
    Ok(())
}

#[test]
fn destination_is_namespace_scoped() {
    assert_eq!(destination("test-namespace"), "/channels/tenants/test-namespace");
}
