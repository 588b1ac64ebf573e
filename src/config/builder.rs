//! Turns configuration into runtime rules and clusters.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{normalize_host, ClusterManager, ClusterNotificationInterceptor, EncryptedPayloadDecoder};
use crate::config::schema::{GatewayConfig, RuleConfig, SessionConfig, StrategyKind, TargetConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::load_balancer::{
    BodyPatternSessionIdExtractor, CookieSessionIdExtractor, DispatchStrategy, HeaderSessionIdExtractor,
    LeastInFlightStrategy, LoadBalancingInterceptor, RoundRobinStrategy, SessionIdExtractor,
};
use crate::routing::{Permissions, Rule, RuleKey, Target};

/// Split `host:port` (IPv6 hosts in brackets).
pub fn parse_node(address: &str) -> GatewayResult<(String, u16)> {
    let invalid = || GatewayError::Config(format!("invalid node address '{}'", address));
    let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = normalize_host(host);
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

/// Static cluster members parsed from the configuration.
#[derive(Debug, Clone, Default)]
pub struct ClusterSeed {
    clusters: Vec<(String, Vec<(String, u16)>)>,
}

impl ClusterSeed {
    /// Parse every configured node address.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let clusters = config
            .clusters
            .iter()
            .map(|cluster| {
                let nodes = cluster
                    .nodes
                    .iter()
                    .map(|node| parse_node(node))
                    .collect::<GatewayResult<Vec<_>>>()?;
                Ok((cluster.name.clone(), nodes))
            })
            .collect::<GatewayResult<Vec<_>>>()?;
        Ok(Self { clusters })
    }

    /// Register the clusters and their nodes as up.
    pub fn apply(&self, manager: &ClusterManager) {
        for (name, nodes) in &self.clusters {
            manager.add_cluster(name);
            for (host, port) in nodes {
                manager.up(name, host, *port);
            }
            tracing::debug!(cluster = %name, nodes = nodes.len(), "Cluster seeded");
        }
    }
}

/// Build every configured rule, in order.
pub fn build_rules(config: &GatewayConfig, manager: &Arc<ClusterManager>) -> GatewayResult<Vec<Arc<Rule>>> {
    config
        .rules
        .iter()
        .map(|rule| build_rule(rule, config, manager).map(Arc::new))
        .collect()
}

pub fn build_rule(rule: &RuleConfig, config: &GatewayConfig, manager: &Arc<ClusterManager>) -> GatewayResult<Rule> {
    let key = match (&rule.path, &rule.path_prefix) {
        (Some(path), _) => RuleKey::new(rule.port, &rule.host, &rule.method, path)?,
        (None, Some(prefix)) => RuleKey::with_path_prefix(rule.port, &rule.host, &rule.method, prefix)?,
        (None, None) => RuleKey::new(rule.port, &rule.host, &rule.method, "*")?,
    };

    let built = match &rule.target {
        TargetConfig::Static { host, port } => Rule::new(
            &rule.name,
            key,
            Target::Static {
                host: host.clone(),
                port: *port,
            },
        ),
        TargetConfig::FromRequest => Rule::new(&rule.name, key, Target::FromRequest),
        TargetConfig::Cluster {
            cluster,
            strategy,
            session,
            failover,
        } => {
            manager.add_cluster(cluster);
            let strategy: Arc<dyn DispatchStrategy> = match strategy {
                StrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
                StrategyKind::LeastInFlight => Arc::new(LeastInFlightStrategy::new()),
            };
            let mut interceptor = LoadBalancingInterceptor::new(cluster.clone(), manager.clone(), strategy)
                .with_failover(*failover);
            if let Some(session) = session {
                interceptor = interceptor.with_extractor(build_extractor(session)?);
            }
            Rule::new(&rule.name, key, Target::Dynamic).with_interceptor(Arc::new(interceptor))
        }
        TargetConfig::ClusterNotification => {
            let settings = &config.cluster_manager;
            let mut interceptor = ClusterNotificationInterceptor::new(manager.clone());
            if settings.validate_signature {
                interceptor = interceptor.with_signatures(
                    Arc::new(EncryptedPayloadDecoder::new(settings.secret.clone())),
                    Duration::from_secs(settings.timeout_secs),
                );
            }
            Rule::new(&rule.name, key, Target::Dynamic).with_interceptor(Arc::new(interceptor))
        }
    };

    let mut built = built.with_permissions(Permissions {
        allow_websocket: rule.allow_websocket,
        allow_tcp: rule.allow_tcp,
        allow_h2c: rule.allow_h2c,
    });
    built.use_h2c = rule.use_h2c;
    built.block_request = rule.block_request;
    built.block_response = rule.block_response;
    Ok(built)
}

fn build_extractor(session: &SessionConfig) -> GatewayResult<Arc<dyn SessionIdExtractor>> {
    Ok(match session {
        SessionConfig::Header { name } => Arc::new(HeaderSessionIdExtractor::new(name)?),
        SessionConfig::Cookie { name } => Arc::new(CookieSessionIdExtractor::new(name.clone())),
        SessionConfig::Body { pattern } => Arc::new(BodyPatternSessionIdExtractor::new(pattern)?),
    })
}
