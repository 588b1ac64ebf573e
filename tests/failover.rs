//! Load balancing, failover, retries and passive node health.

use axum::http::{Request, StatusCode};
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use api_gateway::exchange::{props, ExchangeStatus};

mod common;

fn get(path: &str) -> Request<Bytes> {
    Request::builder().uri(path).body(Bytes::new()).unwrap()
}

fn with_session(path: &str, session: &str) -> Request<Bytes> {
    Request::builder()
        .uri(path)
        .header("x-session", session)
        .body(Bytes::new())
        .unwrap()
}

#[tokio::test]
async fn dead_node_fails_over_to_live_one() {
    let live = common::start_mock_backend("live").await;
    let dead = common::free_port();
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [retries]
        delay_ms = 1

        [health]
        enabled = false

        [[rules]]
        name = "orders"
        port = {port}
        target = {{ type = "cluster", cluster = "orders" }}

        [[clusters]]
        name = "orders"
        nodes = ["127.0.0.1:{dead}", "127.0.0.1:{live}"]
        "#,
        port = port,
        dead = dead,
        live = live.port()
    ));

    for _ in 0..4 {
        let exchange = gateway.process(port, get("/orders"), None).await;
        assert_eq!(exchange.status(), ExchangeStatus::Completed);
        assert_eq!(exchange.response().unwrap().body().as_ref(), b"live");
    }
    gateway.stop();
}

#[tokio::test]
async fn failing_node_is_taken_down() {
    let live = common::start_mock_backend("live").await;
    let dead = common::free_port();
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [retries]
        delay_ms = 1

        [health]
        failure_threshold = 1
        revive_after_secs = 3600

        [[rules]]
        name = "orders"
        port = {port}
        target = {{ type = "cluster", cluster = "orders" }}

        [[clusters]]
        name = "orders"
        nodes = ["127.0.0.1:{dead}", "127.0.0.1:{live}"]
        "#,
        port = port,
        dead = dead,
        live = live.port()
    ));

    for _ in 0..2 {
        gateway.process(port, get("/orders"), None).await;
    }

    let available = gateway.clusters().available_nodes("orders");
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].port(), live.port());
    assert_eq!(gateway.clusters().all_nodes("orders").len(), 2);
    assert_eq!(gateway.failure_tracker().unwrap().downed().len(), 1);
    gateway.stop();
}

#[tokio::test]
async fn sessions_stick_to_their_node() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [[rules]]
        name = "shop"
        port = {port}
        target = {{ type = "cluster", cluster = "shop", session = {{ from = "header", name = "X-Session" }} }}

        [[clusters]]
        name = "shop"
        nodes = ["127.0.0.1:{a}", "127.0.0.1:{b}"]
        "#,
        port = port,
        a = a.port(),
        b = b.port()
    ));

    let first = gateway.process(port, with_session("/cart", "s1"), None).await;
    let body = first.response().unwrap().body().clone();
    let node = first.property_str(props::DISPATCHED_NODE).unwrap().to_string();

    for _ in 0..5 {
        let again = gateway.process(port, with_session("/cart", "s1"), None).await;
        assert_eq!(again.response().unwrap().body(), &body);
        assert_eq!(again.property_str(props::DISPATCHED_NODE), Some(node.as_str()));
    }

    let session = gateway.clusters().session("shop", "s1").unwrap();
    assert_eq!(session.address(), node);
    gateway.stop();
}

#[tokio::test]
async fn empty_cluster_answers_503_without_attempts() {
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [[rules]]
        name = "empty"
        port = {port}
        target = {{ type = "cluster", cluster = "nobody" }}
        "#,
        port = port
    ));
    let attempts = Arc::new(common::AttemptCounter::default());
    gateway.attempts().subscribe(attempts.clone());

    let exchange = gateway.process(port, get("/x"), None).await;
    assert_eq!(exchange.response().unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(exchange.response().unwrap().body().as_ref(), b"No available node");
    assert_eq!(attempts.count(), 0);
    gateway.stop();
}

#[tokio::test]
async fn server_errors_are_retried_when_enabled() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, "busy".to_string())
            } else {
                (200, "done".to_string())
            }
        }
    })
    .await;

    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [retries]
        max_retries = 3
        delay_ms = 1
        failover_on_5xx = true

        [[rules]]
        name = "flaky"
        port = {port}
        target = {{ type = "static", host = "127.0.0.1", port = {backend} }}
        "#,
        port = port,
        backend = backend.port()
    ));

    let exchange = gateway.process(port, get("/job"), None).await;
    assert_eq!(exchange.status(), ExchangeStatus::Completed);
    assert_eq!(exchange.response().unwrap().body().as_ref(), b"done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    gateway.stop();
}

#[tokio::test]
async fn server_errors_pass_through_by_default() {
    let backend = common::start_programmable_backend(|| async { (500, "boom".to_string()) }).await;
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        "[[rules]]\nname = \"broken\"\nport = {}\ntarget = {{ type = \"static\", host = \"127.0.0.1\", port = {} }}\n",
        port,
        backend.port()
    ));
    let attempts = Arc::new(common::AttemptCounter::default());
    gateway.attempts().subscribe(attempts.clone());

    let exchange = gateway.process(port, get("/x"), None).await;
    assert_eq!(exchange.status(), ExchangeStatus::Completed);
    assert_eq!(exchange.response().unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(exchange.response().unwrap().body().as_ref(), b"boom");
    assert_eq!(attempts.count(), 1);
    gateway.stop();
}
