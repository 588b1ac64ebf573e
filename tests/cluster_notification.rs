//! Backends announcing themselves through the notification endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use api_gateway::cluster::EncryptedPayloadDecoder;

mod common;

fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
}

#[tokio::test]
async fn announced_node_receives_traffic() {
    let backend = common::start_mock_backend("from node").await;
    let admin = common::free_port();
    let port = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [[rules]]
        name = "notify"
        port = {admin}
        target = {{ type = "cluster_notification" }}

        [[rules]]
        name = "orders"
        port = {port}
        target = {{ type = "cluster", cluster = "orders" }}
        "#,
        admin = admin,
        port = port
    ));
    let client = reqwest::Client::new();

    let before = client
        .get(format!("http://127.0.0.1:{}/orders", port))
        .send()
        .await
        .unwrap();
    assert_eq!(before.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let up = client
        .get(format!(
            "http://127.0.0.1:{}/clustermanager/up?host=127.0.0.1&port={}&cluster=orders",
            admin,
            backend.port()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(up.status(), reqwest::StatusCode::NO_CONTENT);

    let after = client
        .get(format!("http://127.0.0.1:{}/orders", port))
        .send()
        .await
        .unwrap();
    assert_eq!(after.status(), reqwest::StatusCode::OK);
    assert_eq!(after.text().await.unwrap(), "from node");

    let down = client
        .get(format!(
            "http://127.0.0.1:{}/clustermanager/down?host=127.0.0.1&port={}&cluster=orders",
            admin,
            backend.port()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(down.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(gateway.clusters().available_nodes("orders").is_empty());
    assert_eq!(gateway.clusters().all_nodes("orders").len(), 1);
    gateway.stop();
}

#[tokio::test]
async fn invalid_notification_is_400() {
    let admin = common::free_port();
    let gateway = common::start_gateway(&format!(
        "[[rules]]\nname = \"notify\"\nport = {}\ntarget = {{ type = \"cluster_notification\" }}\n",
        admin
    ));

    let response = reqwest::get(format!(
        "http://127.0.0.1:{}/clustermanager/up?host=127.0.0.1",
        admin
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(gateway.clusters().clusters().is_empty());
    gateway.stop();
}

#[tokio::test]
async fn encrypted_notifications_are_enforced() {
    let admin = common::free_port();
    let gateway = common::start_gateway(&format!(
        r#"
        [cluster_manager]
        validate_signature = true
        secret = "s3cret"
        timeout_secs = 60

        [[rules]]
        name = "notify"
        port = {admin}
        target = {{ type = "cluster_notification" }}
        "#,
        admin = admin
    ));
    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}/clustermanager/up", admin);

    let plain = client
        .get(format!("{}?host=n1&port=80&cluster=c", base))
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status(), reqwest::StatusCode::FORBIDDEN);

    let payload = EncryptedPayloadDecoder::new("s3cret")
        .encode(&format!("host=n1&port=80&cluster=c&time={}", now_millis()))
        .unwrap();
    let signed = client
        .get(format!("{}?data={}", base, payload))
        .send()
        .await
        .unwrap();
    assert_eq!(signed.status(), reqwest::StatusCode::NO_CONTENT);
    assert_eq!(gateway.clusters().all_nodes("c").len(), 1);

    let forged = EncryptedPayloadDecoder::new("guess")
        .encode(&format!("host=n2&port=80&cluster=c&time={}", now_millis()))
        .unwrap();
    let rejected = client
        .get(format!("{}?data={}", base, forged))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(gateway.clusters().all_nodes("c").len(), 1);
    gateway.stop();
}
