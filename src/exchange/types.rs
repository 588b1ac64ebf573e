//! The exchange: one request, its response, and routing metadata.

use axum::http::{Request, Response};
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use uuid::Uuid;

use crate::exchange::ExchangeControl;
use crate::net::connection::Connection;
use crate::pipeline::Interceptor;
use crate::resilience::retries::AttemptFailure;
use crate::routing::Rule;

/// Unique identifier for an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// Request accepted, pipeline running.
    Started,
    /// Backend response received.
    Received,
    /// Response pass finished.
    Completed,
    /// Aborted.
    Failed,
}

/// Protocol switch negotiated for this exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    None,
    /// 101 Switching Protocols to the named protocol.
    Protocol(String),
    /// CONNECT tunnel.
    Tunnel,
}

/// Timestamps recorded along the exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub request_received: Option<SystemTime>,
    pub request_sent: Option<SystemTime>,
    pub response_received: Option<SystemTime>,
    pub response_sent: Option<SystemTime>,
}

/// Notified once when an exchange finishes.
pub trait ExchangeListener: Send + Sync {
    fn on_finished(&self, exchange: &Exchange);
}

/// The unit of work flowing through the pipeline.
pub struct Exchange {
    id: ExchangeId,
    request: Request<Bytes>,
    response: Option<Response<Bytes>>,
    /// Candidate destination URLs, consumed by the HTTP client stage.
    pub destinations: Vec<String>,
    properties: HashMap<String, Value>,
    rule: Option<Weak<Rule>>,
    stack: Vec<Arc<dyn Interceptor>>,
    pub timestamps: Timestamps,
    status: ExchangeStatus,
    error_message: Option<String>,
    node_failures: Vec<AttemptFailure>,
    upgrade: UpgradeState,
    upstream: Option<Connection>,
    control: ExchangeControl,
    listeners: Vec<Arc<dyn ExchangeListener>>,
    listen_port: u16,
    client_addr: Option<SocketAddr>,
}

impl Exchange {
    /// Create an exchange for a request received on `listen_port`.
    pub fn new(request: Request<Bytes>, listen_port: u16) -> Self {
        Self {
            id: ExchangeId::new(),
            request,
            response: None,
            destinations: Vec::new(),
            properties: HashMap::new(),
            rule: None,
            stack: Vec::new(),
            timestamps: Timestamps {
                request_received: Some(SystemTime::now()),
                ..Timestamps::default()
            },
            status: ExchangeStatus::Started,
            error_message: None,
            node_failures: Vec::new(),
            upgrade: UpgradeState::None,
            upstream: None,
            control: ExchangeControl::new(),
            listeners: Vec::new(),
            listen_port,
            client_addr: None,
        }
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.request
    }

    pub fn response(&self) -> Option<&Response<Bytes>> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response<Bytes>> {
        self.response.as_mut()
    }

    pub fn set_response(&mut self, response: Response<Bytes>) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Response<Bytes>> {
        self.response.take()
    }

    // --- Properties ---

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// String view of a property.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// True if the property is `true` or the string `"true"`.
    pub fn flag(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    // --- Rule ---

    pub fn set_rule(&mut self, rule: &Arc<Rule>) {
        self.rule = Some(Arc::downgrade(rule));
    }

    /// The matched rule, if it is still alive.
    pub fn rule(&self) -> Option<Arc<Rule>> {
        self.rule.as_ref().and_then(Weak::upgrade)
    }

    // --- Interceptor stack ---

    pub fn push_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.stack.push(interceptor);
    }

    pub fn pop_interceptor(&mut self) -> Option<Arc<dyn Interceptor>> {
        self.stack.pop()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    // --- Status ---

    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ExchangeStatus) {
        self.status = status;
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub fn node_failures(&self) -> &[AttemptFailure] {
        &self.node_failures
    }

    pub fn set_node_failures(&mut self, failures: Vec<AttemptFailure>) {
        self.node_failures = failures;
    }

    // --- Upgrades ---

    pub fn upgrade(&self) -> &UpgradeState {
        &self.upgrade
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgrade != UpgradeState::None
    }

    /// Mark the exchange as switched to raw relaying over `upstream`.
    pub fn set_upgraded(&mut self, upgrade: UpgradeState, upstream: Connection) {
        self.upgrade = upgrade;
        self.upstream = Some(upstream);
    }

    /// Hand the raw upstream connection to the transport.
    pub fn take_upstream(&mut self) -> Option<Connection> {
        self.upstream.take()
    }

    // --- Control ---

    pub fn control(&self) -> &ExchangeControl {
        &self.control
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ExchangeListener>) {
        self.listeners.push(listener);
    }

    /// Record the response as sent and notify listeners. Listeners fire once.
    pub fn finish(&mut self) {
        self.timestamps.response_sent = Some(SystemTime::now());
        let listeners = std::mem::take(&mut self.listeners);
        for listener in &listeners {
            listener.on_finished(self);
        }
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("status", &self.status)
            .field("destinations", &self.destinations)
            .field("stack_depth", &self.stack.len())
            .field("upgrade", &self.upgrade)
            .finish()
    }
}
