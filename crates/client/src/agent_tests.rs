// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::*;

fn http_client() -> Arc<Client> {
    crate::ensure_crypto();
    Arc::new(Client::new())
}

#[yare::parameterized(
    kafka = { BrokerKind::Kafka, "/api/v1/kafka/topic/get-by-classifier" },
    rabbit = { BrokerKind::Rabbit, "/api/v1/rabbit/queue/get-by-classifier" },
)]
fn resolve_paths(kind: BrokerKind, path: &str) {
    assert_eq!(kind.resolve_path(), path);
}

#[test]
fn base_url_trailing_slash_is_trimmed() {
    let client = AgentClient::new("http://maas-agent:8080/", http_client(), None);
    assert_eq!(client.base_url(), "http://maas-agent:8080");
    assert_eq!(
        client.url(BrokerKind::Kafka.resolve_path()),
        "http://maas-agent:8080/api/v1/kafka/topic/get-by-classifier"
    );
}

#[test]
fn short_bodies_are_kept_whole() {
    assert_eq!(truncate_body(b"boom"), "boom");
}

#[test]
fn long_bodies_are_truncated() {
    let body = "x".repeat(MAX_ERROR_BODY + 100);
    let out = truncate_body(body.as_bytes());
    assert_eq!(out.len(), MAX_ERROR_BODY + 3);
    assert!(out.ends_with("..."));
}

#[test]
fn truncation_respects_char_boundaries() {
    let body = "é".repeat(MAX_ERROR_BODY + 1);
    let out = truncate_body(body.as_bytes());
    assert_eq!(out.chars().count(), MAX_ERROR_BODY + 3);
}

#[tokio::test]
async fn cancelled_context_fails_before_supplier() {
    let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let supplier: Arc<dyn TokenSupplier> = Arc::new(move |_cx: CallContext| {
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        async { Ok("t".to_owned()) }
    });
    // Port 9 (discard) is never contacted: the call must fail first.
    let client = AgentClient::new("http://127.0.0.1:9", http_client(), Some(supplier));

    let cx = CallContext::background();
    cx.cancel();
    let result = client
        .resolve::<serde_json::Value>(&cx, BrokerKind::Kafka, &Classifier::new("orders"))
        .await;
    assert!(matches!(result, Err(MaasError::Cancelled)));
    assert!(!called.load(std::sync::atomic::Ordering::Relaxed));
}

#[tokio::test]
async fn missing_http_client_fails_before_supplier() {
    let built = http_client().get("not a url").build();
    assert!(built.is_err());
    let Err(build_error) = built else { return };

    let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let supplier: Arc<dyn TokenSupplier> = Arc::new(move |_cx: CallContext| {
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        async { Ok("t".to_owned()) }
    });
    let client =
        AgentClient::with_slot("http://127.0.0.1:9", Err(Arc::new(build_error)), Some(supplier));

    let result = client
        .resolve::<serde_json::Value>(
            &CallContext::background(),
            BrokerKind::Kafka,
            &Classifier::new("orders"),
        )
        .await;
    assert!(result.is_err());
    let Err(err) = result else { return };
    assert_eq!(err.kind(), crate::error::ErrorKind::ConnectionFailed);
    assert!(err.to_string().contains("no HTTP client"));
    assert!(!called.load(std::sync::atomic::Ordering::Relaxed));
}
