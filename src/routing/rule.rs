//! Routing policy of one table entry.

use std::sync::Arc;

use crate::pipeline::Interceptor;
use crate::routing::RuleKey;

/// Where a rule forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Fixed backend.
    Static { host: String, port: u16 },
    /// Reverse-proxy mode: derive from the absolute request URI or Host header.
    FromRequest,
    /// Destinations are supplied by an interceptor (load balancer), or an
    /// interceptor answers the request itself.
    Dynamic,
}

/// Per-rule permissions copied onto every exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub allow_websocket: bool,
    pub allow_tcp: bool,
    pub allow_h2c: bool,
}

/// A routing-table entry: match key, interceptor chain, target policy.
pub struct Rule {
    name: String,
    key: RuleKey,
    interceptors: Vec<Arc<dyn Interceptor>>,
    target: Target,
    pub permissions: Permissions,
    /// Forward to the backend with HTTP/2 prior knowledge.
    pub use_h2c: bool,
    /// Park the exchange before forwarding until released.
    pub block_request: bool,
    /// Park the exchange after the backend answered until released.
    pub block_response: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>, key: RuleKey, target: Target) -> Self {
        Self {
            name: name.into(),
            key,
            interceptors: Vec::new(),
            target,
            permissions: Permissions::default(),
            use_h2c: false,
            block_request: false,
            block_response: false,
        }
    }

    /// Append an interceptor to the chain.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("target", &self.target)
            .field(
                "interceptors",
                &self.interceptors.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
