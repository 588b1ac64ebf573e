//! Cluster notification endpoint.
//!
//! Backends announce themselves with
//! `GET /clustermanager/{up,down,takeout}?host=H&port=P&cluster=C`.
//! With signatures enabled the query travels encrypted as `?data=<payload>`,
//! must decode through a [`PayloadDecoder`] and carry a fresh
//! `time=<unix millis>`. Repeated query keys are rejected.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use axum::http::StatusCode;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cluster::manager::{ClusterManager, DEFAULT_CLUSTER};
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::Exchange;
use crate::http::response::{empty_response, error_response};
use crate::pipeline::{Interceptor, Outcome};

const PATH_PREFIX: &str = "/clustermanager/";
const NONCE_LEN: usize = 12;

/// Turns a `data` parameter back into a query string.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, data: &str) -> GatewayResult<String>;
}

/// `hex(nonce || aes-256-gcm(query))`, keyed with `sha256(secret)`.
#[derive(Clone)]
pub struct EncryptedPayloadDecoder {
    cipher: Aes256Gcm,
}

impl EncryptedPayloadDecoder {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let key = Sha256::digest(secret.as_ref());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Produce the payload for a query (client side).
    pub fn encode(&self, query: &str) -> GatewayResult<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), query.as_bytes())
            .map_err(|_| GatewayError::Pipeline("notification payload encryption failed".into()))?;

        let mut payload = nonce_bytes.to_vec();
        payload.extend_from_slice(&ciphertext);
        Ok(hex::encode(payload))
    }
}

impl PayloadDecoder for EncryptedPayloadDecoder {
    fn decode(&self, data: &str) -> GatewayResult<String> {
        let invalid = || GatewayError::Pipeline("invalid notification payload".into());

        let payload = hex::decode(data).map_err(|_| invalid())?;
        if payload.len() <= NONCE_LEN {
            return Err(invalid());
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let query = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| invalid())?;
        String::from_utf8(query).map_err(|_| invalid())
    }
}

impl std::fmt::Debug for EncryptedPayloadDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPayloadDecoder").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Up,
    Down,
    Takeout,
}

/// Serves the notification endpoint on the rule it is attached to.
pub struct ClusterNotificationInterceptor {
    manager: Arc<ClusterManager>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    validate_signature: bool,
    freshness: Duration,
}

impl ClusterNotificationInterceptor {
    /// Plain (unencrypted) notifications.
    pub fn new(manager: Arc<ClusterManager>) -> Self {
        Self {
            manager,
            decoder: None,
            validate_signature: false,
            freshness: Duration::from_secs(60),
        }
    }

    /// Require payloads decoded by `decoder`, at most `freshness` old.
    pub fn with_signatures(mut self, decoder: Arc<dyn PayloadDecoder>, freshness: Duration) -> Self {
        self.decoder = Some(decoder);
        self.validate_signature = true;
        self.freshness = freshness;
        self
    }

    fn operation(path: &str) -> Option<Operation> {
        match path.strip_prefix(PATH_PREFIX)?.trim_end_matches('/') {
            "up" => Some(Operation::Up),
            "down" => Some(Operation::Down),
            "takeout" => Some(Operation::Takeout),
            _ => None,
        }
    }

    /// Resolve the effective parameters, or the status to reject with.
    fn parameters(&self, query: &str) -> Result<HashMap<String, String>, StatusCode> {
        let params = parse_query(query).ok_or(StatusCode::BAD_REQUEST)?;

        let Some(data) = params.get("data") else {
            if self.validate_signature {
                return Err(StatusCode::FORBIDDEN);
            }
            return Ok(params);
        };

        let decoder = self.decoder.as_ref().ok_or(StatusCode::FORBIDDEN)?;
        let decoded = decoder.decode(data).map_err(|_| StatusCode::FORBIDDEN)?;
        let params = parse_query(&decoded).ok_or(StatusCode::FORBIDDEN)?;

        let sent = params
            .get("time")
            .and_then(|t| t.parse::<u64>().ok())
            .ok_or(StatusCode::FORBIDDEN)?;
        if !self.is_fresh(sent) {
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(params)
    }

    fn is_fresh(&self, sent_millis: u64) -> bool {
        if self.freshness.is_zero() {
            return true;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let window = self.freshness.as_millis() as u64;
        now.abs_diff(sent_millis) <= window
    }

    fn apply(&self, operation: Operation, params: &HashMap<String, String>) -> StatusCode {
        let Some(host) = params.get("host").filter(|h| !h.is_empty()) else {
            return StatusCode::BAD_REQUEST;
        };
        let Some(port) = params.get("port").and_then(|p| p.parse::<u16>().ok()) else {
            return StatusCode::BAD_REQUEST;
        };
        let cluster = params
            .get("cluster")
            .filter(|c| !c.is_empty())
            .map(String::as_str)
            .unwrap_or(DEFAULT_CLUSTER);

        match operation {
            Operation::Up => self.manager.up(cluster, host, port),
            Operation::Down => {
                self.manager.down(cluster, host, port);
            }
            Operation::Takeout => {
                self.manager.takeout(cluster, host, port);
            }
        }
        StatusCode::NO_CONTENT
    }
}

#[async_trait]
impl Interceptor for ClusterNotificationInterceptor {
    fn name(&self) -> &str {
        "cluster-notification"
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        let Some(operation) = Self::operation(exchange.request().uri().path()) else {
            return Ok(Outcome::Continue);
        };
        let query = exchange.request().uri().query().unwrap_or("").to_string();

        let status = match self.parameters(&query) {
            Ok(params) => self.apply(operation, &params),
            Err(status) => status,
        };

        tracing::info!(
            exchange_id = %exchange.id(),
            operation = ?operation,
            status = status.as_u16(),
            "Cluster notification handled"
        );

        let response = if status == StatusCode::NO_CONTENT {
            empty_response(status)
        } else {
            error_response(status)
        };
        exchange.set_response(response);
        Ok(Outcome::Return)
    }
}

/// Query parameters, or `None` when a key repeats.
fn parse_query(query: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if params.insert(key.into_owned(), value.into_owned()).is_some() {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use bytes::Bytes;

    fn exchange(uri: &str) -> Exchange {
        Exchange::new(Request::builder().uri(uri).body(Bytes::new()).unwrap(), 9010)
    }

    async fn call(stage: &ClusterNotificationInterceptor, uri: &str) -> (Outcome, StatusCode) {
        let mut exc = exchange(uri);
        let outcome = stage.handle_request(&mut exc).await.unwrap();
        let status = exc.response().map(|r| r.status()).unwrap_or(StatusCode::OK);
        (outcome, status)
    }

    fn now_millis() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    #[tokio::test]
    async fn plain_notifications_update_cluster() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        let stage = ClusterNotificationInterceptor::new(manager.clone());

        let (outcome, status) = call(&stage, "/clustermanager/up?host=n1&port=8080&cluster=orders").await;
        assert_eq!(outcome, Outcome::Return);
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(manager.available_nodes("orders").len(), 1);

        call(&stage, "/clustermanager/down?host=n1&port=8080&cluster=orders").await;
        assert!(manager.available_nodes("orders").is_empty());
        assert_eq!(manager.all_nodes("orders").len(), 1);

        call(&stage, "/clustermanager/takeout?host=n1&port=8080&cluster=orders").await;
        assert!(manager.all_nodes("orders").is_empty());
    }

    #[tokio::test]
    async fn missing_cluster_uses_default() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        let stage = ClusterNotificationInterceptor::new(manager.clone());

        call(&stage, "/clustermanager/up?host=n1&port=80").await;
        assert_eq!(manager.all_nodes("Default").len(), 1);
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        let stage = ClusterNotificationInterceptor::new(manager.clone());

        let (_, status) = call(&stage, "/clustermanager/up?port=80").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, status) = call(&stage, "/clustermanager/up?host=n1&port=eighty").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(manager.clusters().is_empty());
    }

    #[tokio::test]
    async fn other_paths_pass_through() {
        let stage = ClusterNotificationInterceptor::new(Arc::new(ClusterManager::default()));
        let (outcome, _) = call(&stage, "/orders").await;
        assert_eq!(outcome, Outcome::Continue);
    }

    #[tokio::test]
    async fn encrypted_payloads() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        let decoder = Arc::new(EncryptedPayloadDecoder::new("s3cret"));
        let stage = ClusterNotificationInterceptor::new(manager.clone())
            .with_signatures(decoder.clone(), Duration::from_secs(60));

        let (_, status) = call(&stage, "/clustermanager/up?host=n1&port=80").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let fresh = decoder
            .encode(&format!("host=n1&port=80&cluster=c&time={}", now_millis()))
            .unwrap();
        let (_, status) = call(&stage, &format!("/clustermanager/up?data={}", fresh)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(manager.all_nodes("c").len(), 1);

        let stale = decoder
            .encode(&format!("host=n2&port=80&cluster=c&time={}", now_millis() - 120_000))
            .unwrap();
        let (_, status) = call(&stage, &format!("/clustermanager/up?data={}", stale)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let forged = EncryptedPayloadDecoder::new("other")
            .encode(&format!("host=n3&port=80&cluster=c&time={}", now_millis()))
            .unwrap();
        let (_, status) = call(&stage, &format!("/clustermanager/up?data={}", forged)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(manager.all_nodes("c").len(), 1);
    }

    #[test]
    fn payload_hides_query_and_rejects_garbage() {
        let decoder = EncryptedPayloadDecoder::new("k");
        let payload = decoder.encode("host=a&port=1").unwrap();
        assert!(!payload.contains(&hex::encode("host=a")));
        assert_ne!(payload, decoder.encode("host=a&port=1").unwrap());
        assert_eq!(decoder.decode(&payload).unwrap(), "host=a&port=1");
        assert!(decoder.decode("zz").is_err());
        assert!(decoder.decode("00ff").is_err());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let decoder = EncryptedPayloadDecoder::new("k");
        let mut payload = hex::decode(decoder.encode("host=a&port=1&time=1").unwrap()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        assert!(decoder.decode(&hex::encode(&payload)).is_err());

        payload[last] ^= 0x01;
        payload[NONCE_LEN] ^= 0x80;
        assert!(decoder.decode(&hex::encode(&payload)).is_err());
    }

    #[tokio::test]
    async fn repeated_keys_are_rejected() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        let plain = ClusterNotificationInterceptor::new(manager.clone());
        let (_, status) = call(&plain, "/clustermanager/up?host=n1&host=n2&port=80").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let decoder = Arc::new(EncryptedPayloadDecoder::new("s3cret"));
        let signed = ClusterNotificationInterceptor::new(manager.clone())
            .with_signatures(decoder.clone(), Duration::from_secs(60));
        let replayed = decoder
            .encode(&format!("host=n1&port=80&time=1&time={}", now_millis()))
            .unwrap();
        let (_, status) = call(&signed, &format!("/clustermanager/up?data={}", replayed)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(manager.clusters().is_empty());
    }
}
