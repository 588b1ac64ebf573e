//! Cluster dispatch stage.

use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;

use crate::cluster::{ClusterManager, Node};
use crate::error::GatewayResult;
use crate::exchange::{props, Exchange};
use crate::http::response::text_response;
use crate::load_balancer::{DispatchStrategy, Phase, SessionIdExtractor};
use crate::pipeline::{Interceptor, Outcome};

/// Resolves a cluster to concrete node destinations.
pub struct LoadBalancingInterceptor {
    cluster: String,
    manager: Arc<ClusterManager>,
    strategy: Arc<dyn DispatchStrategy>,
    extractor: Option<Arc<dyn SessionIdExtractor>>,
    failover: bool,
}

impl LoadBalancingInterceptor {
    pub fn new(
        cluster: impl Into<String>,
        manager: Arc<ClusterManager>,
        strategy: Arc<dyn DispatchStrategy>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            manager,
            strategy,
            extractor: None,
            failover: true,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn SessionIdExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Append the other available nodes as fallback destinations.
    pub fn with_failover(mut self, failover: bool) -> Self {
        self.failover = failover;
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn sticky_node(&self, session_id: &str, available: &[Node]) -> Option<Node> {
        let session = self.manager.session(&self.cluster, session_id)?;
        available.iter().find(|n| n.is(&session.host, session.port)).cloned()
    }

    fn dispatched_node(exchange: &Exchange) -> Option<Node> {
        let address = exchange.property_str(props::DISPATCHED_NODE)?;
        let (host, port) = address.rsplit_once(':')?;
        Some(Node::new(host, port.parse().ok()?))
    }

    fn finish_dispatch(&self, exchange: &mut Exchange) {
        if exchange.remove_property(DISPATCH_OPEN).is_none() {
            return;
        }
        if let Some(node) = Self::dispatched_node(exchange) {
            self.strategy.done(&self.cluster, &node);
        }
    }
}

/// Set while the strategy counts the dispatch as in flight.
const DISPATCH_OPEN: &str = "loadBalancerDispatchOpen";

#[async_trait]
impl Interceptor for LoadBalancingInterceptor {
    fn name(&self) -> &str {
        "load-balancer"
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        let session_id = self
            .extractor
            .as_ref()
            .and_then(|e| e.extract(exchange, Phase::Request));
        let available = self.manager.available_nodes(&self.cluster);

        let sticky = session_id
            .as_deref()
            .and_then(|id| self.sticky_node(id, &available));
        let node = match sticky {
            Some(node) => {
                tracing::debug!(exchange_id = %exchange.id(), cluster = %self.cluster, node = %node.address(), "Sticky dispatch");
                node
            }
            None => {
                let Some(node) = self.strategy.select(&self.cluster, &available) else {
                    tracing::warn!(exchange_id = %exchange.id(), cluster = %self.cluster, "No available node");
                    exchange.set_response(text_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "No available node",
                    ));
                    return Ok(Outcome::Return);
                };
                if let Some(id) = &session_id {
                    self.manager.bind_session(&self.cluster, id, &node);
                }
                node
            }
        };

        self.strategy.begin(&self.cluster, &node);
        exchange.set_property(DISPATCH_OPEN, true);
        exchange.set_property(props::DISPATCHED_NODE, node.address());
        exchange.set_property(props::DISPATCHED_CLUSTER, self.cluster.clone());
        if let Some(id) = session_id {
            exchange.set_property(props::SESSION_ID, id);
        }

        let path_and_query = exchange
            .request()
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();
        let mut destinations = vec![format!("http://{}{}", node.address(), path_and_query)];
        if self.failover {
            destinations.extend(
                available
                    .iter()
                    .filter(|n| !n.is(node.host(), node.port()))
                    .map(|n| format!("http://{}{}", n.address(), path_and_query)),
            );
        }

        tracing::debug!(
            exchange_id = %exchange.id(),
            cluster = %self.cluster,
            strategy = self.strategy.name(),
            node = %node.address(),
            candidates = destinations.len(),
            "Dispatching to cluster node"
        );
        exchange.destinations = destinations;
        Ok(Outcome::Continue)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> GatewayResult<Outcome> {
        self.finish_dispatch(exchange);

        let successful = exchange
            .response()
            .map(|r| r.status().as_u16() < 400)
            .unwrap_or(false);
        if !successful || exchange.property(props::SESSION_ID).is_some() {
            return Ok(Outcome::Continue);
        }

        let session_id = self
            .extractor
            .as_ref()
            .and_then(|e| e.extract(exchange, Phase::Response));
        if let (Some(id), Some(node)) = (session_id, Self::dispatched_node(exchange)) {
            tracing::debug!(exchange_id = %exchange.id(), cluster = %self.cluster, node = %node.address(), "Session bound from response");
            self.manager.bind_session(&self.cluster, &id, &node);
            exchange.set_property(props::SESSION_ID, id);
        }
        Ok(Outcome::Continue)
    }

    async fn handle_abort(&self, exchange: &mut Exchange) -> GatewayResult<()> {
        self.finish_dispatch(exchange);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{HeaderSessionIdExtractor, LeastInFlightStrategy, RoundRobinStrategy};
    use crate::protocol::Destination;
    use axum::http::{Request, Response};
    use bytes::Bytes;
    use std::time::Duration;

    fn manager(nodes: &[(&str, u16)]) -> Arc<ClusterManager> {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        for (host, port) in nodes {
            manager.up("c", host, *port);
        }
        manager
    }

    fn exchange(session: Option<&str>) -> Exchange {
        let mut builder = Request::builder().uri("/svc?x=1");
        if let Some(id) = session {
            builder = builder.header("x-session", id);
        }
        Exchange::new(builder.body(Bytes::new()).unwrap(), 8080)
    }

    fn sticky(manager: Arc<ClusterManager>) -> LoadBalancingInterceptor {
        LoadBalancingInterceptor::new("c", manager, Arc::new(RoundRobinStrategy::new()))
            .with_extractor(Arc::new(HeaderSessionIdExtractor::new("x-session").unwrap()))
    }

    #[tokio::test]
    async fn destinations_start_with_chosen_node() {
        let stage = sticky(manager(&[("a", 1), ("b", 2)]));
        let mut exc = exchange(None);

        assert_eq!(stage.handle_request(&mut exc).await.unwrap(), Outcome::Continue);
        assert_eq!(exc.destinations, vec!["http://a:1/svc?x=1", "http://b:2/svc?x=1"]);
        assert_eq!(exc.property_str(props::DISPATCHED_NODE), Some("a:1"));
        assert_eq!(exc.property_str(props::DISPATCHED_CLUSTER), Some("c"));

        let mut exc = exchange(None);
        stage.handle_request(&mut exc).await.unwrap();
        assert_eq!(exc.destinations[0], "http://b:2/svc?x=1");
    }

    #[tokio::test]
    async fn failover_off_uses_single_destination() {
        let stage = sticky(manager(&[("a", 1), ("b", 2)])).with_failover(false);
        let mut exc = exchange(None);
        stage.handle_request(&mut exc).await.unwrap();
        assert_eq!(exc.destinations.len(), 1);
    }

    #[tokio::test]
    async fn session_sticks_to_bound_node() {
        let manager = manager(&[("a", 1), ("b", 2)]);
        let stage = sticky(manager.clone());

        let mut first = exchange(Some("s1"));
        stage.handle_request(&mut first).await.unwrap();
        let node = first.property_str(props::DISPATCHED_NODE).unwrap().to_string();

        for _ in 0..3 {
            let mut again = exchange(Some("s1"));
            stage.handle_request(&mut again).await.unwrap();
            assert_eq!(again.property_str(props::DISPATCHED_NODE), Some(node.as_str()));
        }
    }

    #[tokio::test]
    async fn session_moves_when_node_goes_down() {
        let manager = manager(&[("a", 1), ("b", 2)]);
        let stage = sticky(manager.clone());

        let mut first = exchange(Some("s1"));
        stage.handle_request(&mut first).await.unwrap();
        assert_eq!(first.property_str(props::DISPATCHED_NODE), Some("a:1"));

        manager.down("c", "a", 1);
        let mut second = exchange(Some("s1"));
        stage.handle_request(&mut second).await.unwrap();
        assert_eq!(second.property_str(props::DISPATCHED_NODE), Some("b:2"));
        assert_eq!(manager.session("c", "s1").unwrap().port, 2);
    }

    #[tokio::test]
    async fn empty_cluster_answers_503() {
        let stage = sticky(manager(&[]));
        let mut exc = exchange(None);

        assert_eq!(stage.handle_request(&mut exc).await.unwrap(), Outcome::Return);
        assert_eq!(exc.response().unwrap().status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(exc.destinations.is_empty());
    }

    #[tokio::test]
    async fn response_binds_session_lazily() {
        let manager = manager(&[("a", 1), ("b", 2)]);
        let stage = sticky(manager.clone());

        let mut exc = exchange(None);
        stage.handle_request(&mut exc).await.unwrap();
        exc.set_response(Response::builder().header("x-session", "new").body(Bytes::new()).unwrap());
        stage.handle_response(&mut exc).await.unwrap();

        let session = manager.session("c", "new").unwrap();
        assert_eq!(session.address(), "a:1");
    }

    #[tokio::test]
    async fn failed_response_binds_nothing() {
        let manager = manager(&[("a", 1)]);
        let stage = sticky(manager.clone());

        let mut exc = exchange(None);
        stage.handle_request(&mut exc).await.unwrap();
        exc.set_response(
            Response::builder()
                .status(500)
                .header("x-session", "new")
                .body(Bytes::new())
                .unwrap(),
        );
        stage.handle_response(&mut exc).await.unwrap();
        assert!(manager.session("c", "new").is_none());
    }

    #[tokio::test]
    async fn in_flight_is_released_on_response_and_abort() {
        let strategy = Arc::new(LeastInFlightStrategy::new());
        let stage = LoadBalancingInterceptor::new("c", manager(&[("a", 1)]), strategy.clone());
        let node = Node::new("a", 1);

        let mut ok = exchange(None);
        stage.handle_request(&mut ok).await.unwrap();
        let mut failed = exchange(None);
        stage.handle_request(&mut failed).await.unwrap();
        assert_eq!(strategy.in_flight("c", &node), 2);

        ok.set_response(Response::new(Bytes::new()));
        stage.handle_response(&mut ok).await.unwrap();
        stage.handle_abort(&mut failed).await.unwrap();
        assert_eq!(strategy.in_flight("c", &node), 0);

        // A second abort on the same exchange does not double count.
        stage.handle_abort(&mut failed).await.unwrap();
        assert_eq!(strategy.in_flight("c", &node), 0);
    }

    #[tokio::test]
    async fn ipv6_nodes_get_bracketed_destinations() {
        let strategy = Arc::new(LeastInFlightStrategy::new());
        let stage = LoadBalancingInterceptor::new("c", manager(&[("[::1]", 8080)]), strategy.clone());
        let mut exc = exchange(None);

        stage.handle_request(&mut exc).await.unwrap();
        assert_eq!(exc.destinations, vec!["http://[::1]:8080/svc?x=1"]);
        assert_eq!(exc.property_str(props::DISPATCHED_NODE), Some("[::1]:8080"));
        let destination = Destination::parse(&exc.destinations[0]).unwrap();
        assert_eq!(destination.port(), 8080);

        let node = Node::new("::1", 8080);
        assert_eq!(strategy.in_flight("c", &node), 1);
        stage.handle_abort(&mut exc).await.unwrap();
        assert_eq!(strategy.in_flight("c", &node), 0);
    }
}
