//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound listener settings shared by every port.
    pub listener: ListenerConfig,

    /// Routing rules, in match order.
    pub rules: Vec<RuleConfig>,

    /// Statically known clusters.
    pub clusters: Vec<ClusterConfig>,

    /// Cluster manager and notification endpoint settings.
    pub cluster_manager: ClusterManagerConfig,

    /// Retry / failover configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Passive node health settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface every rule port binds on (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Maximum buffered request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A routing rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Rule identifier for logging/metrics.
    pub name: String,

    /// Listen port.
    pub port: u16,

    /// Space-separated host globs, `*` for any.
    #[serde(default = "wildcard")]
    pub host: String,

    /// HTTP method, `*` for any.
    #[serde(default = "wildcard")]
    pub method: String,

    /// Path regular expression matched against the whole path.
    #[serde(default)]
    pub path: Option<String>,

    /// Literal path prefix (used when `path` is absent).
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Where matched requests go.
    #[serde(default)]
    pub target: TargetConfig,

    /// Permit `Upgrade: websocket`.
    #[serde(default)]
    pub allow_websocket: bool,

    /// Permit `Upgrade: tcp`.
    #[serde(default)]
    pub allow_tcp: bool,

    /// Permit HTTP/2 cleartext towards the backend.
    #[serde(default)]
    pub allow_h2c: bool,

    /// Talk HTTP/2 prior knowledge to the backend (requires `allow_h2c`).
    #[serde(default)]
    pub use_h2c: bool,

    /// Hold each exchange before forwarding until released.
    #[serde(default)]
    pub block_request: bool,

    /// Hold each exchange after the backend answered until released.
    #[serde(default)]
    pub block_response: bool,
}

fn wildcard() -> String {
    "*".to_string()
}

/// Target of a rule.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetConfig {
    /// Fixed backend.
    Static { host: String, port: u16 },
    /// Reverse-proxy mode.
    #[default]
    FromRequest,
    /// Load-balance over a cluster.
    Cluster {
        cluster: String,
        #[serde(default)]
        strategy: StrategyKind,
        #[serde(default)]
        session: Option<SessionConfig>,
        /// Add the other available nodes as failover destinations.
        #[serde(default = "default_true")]
        failover: bool,
    },
    /// Serve the cluster notification endpoint.
    ClusterNotification,
}

fn default_true() -> bool {
    true
}

/// Node selection strategy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    LeastInFlight,
}

/// Where a session id is read from.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum SessionConfig {
    Header { name: String },
    Cookie { name: String },
    /// Regular expression with one capture group applied to the body.
    Body { pattern: String },
}

/// A cluster with its initial nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,

    /// Node addresses (e.g., "10.0.0.1:8080").
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Cluster manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterManagerConfig {
    /// Nodes not seen for this long are excluded from selection. 0 disables.
    pub node_timeout_secs: u64,

    /// Sessions unused for this long are purged. 0 disables.
    pub session_timeout_secs: u64,

    /// Require encrypted, timestamped notification payloads.
    pub validate_signature: bool,

    /// Shared secret the payload key is derived from.
    pub secret: String,

    /// Accepted age of a payload in seconds.
    pub timeout_secs: u64,
}

impl Default for ClusterManagerConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: 0,
            session_timeout_secs: 0,
            validate_signature: false,
            secret: String::new(),
            timeout_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Delay between attempts on a single destination, in milliseconds.
    pub delay_ms: u64,

    /// Multiplier applied per attempt (1.0 keeps the delay constant).
    pub backoff_multiplier: f64,

    /// Upper bound for the delay in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,

    /// Treat 5xx and 408 responses as retryable.
    pub failover_on_5xx: bool,

    /// Methods that are not retried after bytes may have reached a single backend.
    pub mutating_methods: Vec<String>,

    /// Attach per-attempt failures to the exchange.
    pub track_node_failures: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay_ms: 250,
            backoff_multiplier: 1.0,
            max_delay_ms: 10_000,
            jitter: false,
            failover_on_5xx: false,
            mutating_methods: vec!["POST".to_string(), "PATCH".to_string()],
            track_node_failures: false,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Outbound read timeout in milliseconds.
    pub read_ms: u64,

    /// Idle pooled connection lifetime in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            read_ms: 30_000,
            idle_secs: 60,
        }
    }
}

/// Passive health configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Take nodes down after consecutive failures.
    pub enabled: bool,

    /// Consecutive failed attempts before a node is marked down.
    pub failure_threshold: u32,

    /// Seconds a downed node waits before it is revived.
    pub revive_after_secs: u64,

    /// Interval of the revive loop in seconds.
    pub check_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 3,
            revive_after_secs: 30,
            check_interval_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
