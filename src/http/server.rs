//! The gateway engine and its inbound HTTP surface.
//!
//! # Responsibilities
//! - Own the shared subsystems (rule table, clusters, pool, listeners)
//! - Turn an inbound request into an [`Exchange`] and match it to a rule
//! - Build the per-rule chain and drive it through the pipeline executor
//! - Serve every rule port with an axum router built on demand
//! - Relay raw bytes between client and backend after upgrades / CONNECT
//!
//! # Data Flow
//! ```text
//! axum fallback handler (port P)
//!     → buffer body (max_body_bytes)
//!     → Gateway::process
//!         → RuleTable::match_request (miss → 404)
//!         → rule.interceptors + [blocking] + dispatch + http client
//!         → PipelineExecutor::run
//!     → response to client
//!     → upgraded? spawn byte relay (client ⇄ backend)
//! ```
//!
//! # Design Decisions
//! - Listener routers hold a `Weak<Gateway>`; the registry is owned by the
//!   gateway and must not keep it alive
//! - Listener, timeout and retry settings are read once at construction;
//!   a reload swaps rules and clusters only

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use bytes::Bytes;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::cluster::ClusterManager;
use crate::config::builder::{build_rules, ClusterSeed};
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::exchange::{props, Exchange, ExchangeId, ExchangeStore};
use crate::health::{AttemptBroadcaster, NodeFailureTracker};
use crate::http::client::HttpClientInterceptor;
use crate::http::request::{ensure_request_id, requested_upgrade};
use crate::http::response::{error_response, into_axum, text_response};
use crate::lifecycle::Shutdown;
use crate::net::{Connection, ConnectionPool, ListenerRegistry};
use crate::observability::metrics::record_exchange;
use crate::pipeline::{BlockingInterceptor, DispatchInterceptor, Interceptor, PipelineExecutor};
use crate::resilience::RetryHandler;
use crate::routing::{RequestKey, Rule, RuleTable};

/// Idle keep-alive connections kept per backend.
const MAX_IDLE_PER_HOST: usize = 32;

/// The routing and dispatch engine.
pub struct Gateway {
    config: ArcSwap<GatewayConfig>,
    rules: Arc<RuleTable>,
    clusters: Arc<ClusterManager>,
    store: ExchangeStore,
    pool: Arc<ConnectionPool>,
    dispatch: Arc<dyn Interceptor>,
    client: Arc<HttpClientInterceptor>,
    executor: PipelineExecutor,
    listeners: Arc<ListenerRegistry>,
    attempts: AttemptBroadcaster,
    failure_tracker: Option<Arc<NodeFailureTracker>>,
}

impl Gateway {
    /// Wire the subsystems. No port is opened until [`Gateway::start`].
    pub fn new(config: GatewayConfig, shutdown: Shutdown) -> Arc<Self> {
        let clusters = Arc::new(ClusterManager::new(Duration::from_secs(
            config.cluster_manager.node_timeout_secs,
        )));

        let attempts = AttemptBroadcaster::new();
        let failure_tracker = config.health.enabled.then(|| {
            let tracker = Arc::new(NodeFailureTracker::from_config(clusters.clone(), &config.health));
            attempts.subscribe(tracker.clone());
            tracker
        });

        let pool = Arc::new(ConnectionPool::new(
            Duration::from_secs(config.timeouts.idle_secs),
            MAX_IDLE_PER_HOST,
        ));
        let client = Arc::new(HttpClientInterceptor::new(
            RetryHandler::new(config.retries.clone(), attempts.clone()),
            pool.clone(),
            &config.timeouts,
        ));

        let listeners = Arc::new(ListenerRegistry::new(
            config.listener.bind_host.clone(),
            shutdown,
        ));
        let rules = Arc::new(RuleTable::new(listeners.clone()));

        let gateway = Arc::new(Self {
            config: ArcSwap::from_pointee(config),
            rules,
            clusters,
            store: ExchangeStore::new(),
            pool,
            dispatch: Arc::new(DispatchInterceptor::new()),
            client,
            executor: PipelineExecutor::new(),
            listeners,
            attempts,
            failure_tracker,
        });

        let weak = Arc::downgrade(&gateway);
        gateway
            .listeners
            .set_router_factory(Arc::new(move |port| inbound_router(weak.clone(), port)));
        gateway
    }

    /// Seed clusters and publish the configured rules, opening their ports.
    pub fn start(&self) -> GatewayResult<()> {
        let config = self.config.load_full();
        self.apply(&config)?;
        tracing::info!(
            rules = self.rules.len(),
            ports = ?self.listeners.ports(),
            "Gateway started"
        );
        Ok(())
    }

    /// Replace rules and static cluster nodes from a new configuration.
    /// On error the current rules stay in place.
    pub fn reload(&self, config: GatewayConfig) -> GatewayResult<()> {
        self.apply(&config)?;
        self.config.store(Arc::new(config));
        tracing::info!(
            rules = self.rules.len(),
            ports = ?self.listeners.ports(),
            "Configuration reloaded"
        );
        Ok(())
    }

    fn apply(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let rules = build_rules(config, &self.clusters)?;
        let seed = ClusterSeed::from_config(config)?;
        self.rules.replace_all(rules)?;
        seed.apply(&self.clusters);
        Ok(())
    }

    /// Stop serving every port and drop pooled connections.
    pub fn stop(&self) {
        self.listeners.close_all();
        self.pool.clear();
        tracing::info!("Gateway stopped");
    }

    pub fn rules(&self) -> &Arc<RuleTable> {
        &self.rules
    }

    pub fn clusters(&self) -> &Arc<ClusterManager> {
        &self.clusters
    }

    /// Blocked exchanges awaiting release.
    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn attempts(&self) -> &AttemptBroadcaster {
        &self.attempts
    }

    pub fn failure_tracker(&self) -> Option<&Arc<NodeFailureTracker>> {
        self.failure_tracker.as_ref()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Release a blocked exchange.
    pub fn release(&self, id: &ExchangeId) -> bool {
        self.store.release(id)
    }

    /// Run one request through the engine. The caller finishes the exchange
    /// once the response has been handed to the client.
    pub async fn process(
        &self,
        port: u16,
        mut request: Request<Bytes>,
        client_addr: Option<SocketAddr>,
    ) -> Exchange {
        let started = Instant::now();
        let request_id = ensure_request_id(&mut request);
        let key = RequestKey::from_request(port, &request);

        let mut exchange = Exchange::new(request, port);
        if let Some(addr) = client_addr {
            exchange = exchange.with_client_addr(addr);
        }

        let Some(rule) = self.rules.match_request(&key) else {
            tracing::info!(
                exchange_id = %exchange.id(),
                request_id = %request_id,
                port,
                host = %key.host,
                method = %key.method,
                path = %key.path,
                "No rule matched"
            );
            exchange.set_response(text_response(StatusCode::NOT_FOUND, "No matching rule"));
            record_exchange("none", StatusCode::NOT_FOUND.as_u16(), started);
            return exchange;
        };

        exchange.set_rule(&rule);
        Self::apply_permissions(&mut exchange, &rule);
        let chain = self.chain_for(&rule);

        tracing::debug!(
            exchange_id = %exchange.id(),
            request_id = %request_id,
            rule = rule.name(),
            method = %key.method,
            path = %key.path,
            stages = chain.len(),
            "Rule matched"
        );

        let status = self.executor.run(&mut exchange, &chain).await;
        let code = exchange
            .response()
            .map(|r| r.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
        record_exchange(rule.name(), code, started);

        tracing::info!(
            exchange_id = %exchange.id(),
            rule = rule.name(),
            status = ?status,
            code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Exchange processed"
        );
        exchange
    }

    fn apply_permissions(exchange: &mut Exchange, rule: &Rule) {
        let permissions = rule.permissions;
        for (key, allowed) in [
            (props::ALLOW_WEBSOCKET, permissions.allow_websocket),
            (props::ALLOW_TCP, permissions.allow_tcp),
            (props::ALLOW_H2C, permissions.allow_h2c),
            (props::USE_H2C, rule.use_h2c),
        ] {
            if allowed {
                exchange.set_property(key, true);
            }
        }
    }

    /// `rule.interceptors`, optional blocking, dispatch, then the HTTP client.
    fn chain_for(&self, rule: &Rule) -> Vec<Arc<dyn Interceptor>> {
        let mut chain: Vec<Arc<dyn Interceptor>> = rule.interceptors().to_vec();
        if rule.block_request || rule.block_response {
            chain.push(Arc::new(BlockingInterceptor::new(
                self.store.clone(),
                rule.block_request,
                rule.block_response,
            )));
        }
        chain.push(self.dispatch.clone());
        chain.push(self.client.clone());
        chain
    }

    fn max_body_bytes(&self) -> usize {
        self.config.load().listener.max_body_bytes
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("rules", &self.rules.len())
            .field("clusters", &self.clusters.clusters())
            .field("ports", &self.listeners.ports())
            .finish()
    }
}

#[derive(Clone)]
struct PortState {
    gateway: Weak<Gateway>,
    port: u16,
}

/// Router served on one rule port: every method and path goes to the engine.
fn inbound_router(gateway: Weak<Gateway>, port: u16) -> Router {
    Router::new()
        .fallback(handle_inbound)
        .with_state(PortState { gateway, port })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn handle_inbound(
    State(state): State<PortState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
) -> Response {
    let Some(gateway) = state.gateway.upgrade() else {
        return into_axum(error_response(StatusCode::SERVICE_UNAVAILABLE));
    };

    let limit = gateway.max_body_bytes();
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        tracing::warn!(port = state.port, limit, "Request body too large");
        return into_axum(error_response(StatusCode::PAYLOAD_TOO_LARGE));
    }

    let on_upgrade = wants_relay(&request).then(|| hyper::upgrade::on(&mut request));

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(port = state.port, error = %e, "Failed to read request body");
            return into_axum(error_response(StatusCode::BAD_REQUEST));
        }
    };

    let mut exchange = gateway
        .process(state.port, Request::from_parts(parts, body), Some(client))
        .await;
    let response = exchange
        .take_response()
        .unwrap_or_else(|| error_response(StatusCode::INTERNAL_SERVER_ERROR));

    if exchange.is_upgraded() {
        match (exchange.take_upstream(), on_upgrade) {
            (Some(upstream), Some(on_upgrade)) => spawn_relay(exchange.id(), on_upgrade, upstream),
            _ => tracing::warn!(exchange_id = %exchange.id(), "Upgraded exchange has nothing to relay"),
        }
    }

    exchange.finish();
    into_axum(response)
}

fn wants_relay(request: &Request<Body>) -> bool {
    request.method() == Method::CONNECT || requested_upgrade(request).is_some()
}

/// Copy bytes both ways until either side closes.
fn spawn_relay(exchange_id: ExchangeId, on_upgrade: OnUpgrade, upstream: Connection) {
    let (mut backend, read_ahead) = upstream.into_parts();
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::warn!(exchange_id = %exchange_id, error = %e, "Client upgrade failed");
                return;
            }
        };
        let mut client = TokioIo::new(upgraded);

        if !read_ahead.is_empty() {
            if let Err(e) = client.write_all(&read_ahead).await {
                tracing::debug!(exchange_id = %exchange_id, error = %e, "Relay ended early");
                return;
            }
        }

        match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
            Ok((to_backend, to_client)) => tracing::debug!(
                exchange_id = %exchange_id,
                to_backend,
                to_client,
                "Relay closed"
            ),
            Err(e) => tracing::debug!(exchange_id = %exchange_id, error = %e, "Relay ended"),
        }
    });
}
