//! Least in-flight dispatch strategy.

use dashmap::DashMap;

use crate::cluster::Node;
use crate::load_balancer::DispatchStrategy;

/// Selects the node with the fewest dispatches still in flight.
/// Ties go to the first node in cluster order.
#[derive(Debug, Default)]
pub struct LeastInFlightStrategy {
    in_flight: DashMap<(String, String), usize>,
}

impl LeastInFlightStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current in-flight count for a node.
    pub fn in_flight(&self, cluster: &str, node: &Node) -> usize {
        self.in_flight
            .get(&(cluster.to_string(), node.address()))
            .map(|c| *c)
            .unwrap_or(0)
    }
}

impl DispatchStrategy for LeastInFlightStrategy {
    fn name(&self) -> &str {
        "least-in-flight"
    }

    fn select(&self, cluster: &str, nodes: &[Node]) -> Option<Node> {
        nodes
            .iter()
            .min_by_key(|n| self.in_flight(cluster, n))
            .cloned()
    }

    fn begin(&self, cluster: &str, node: &Node) {
        *self
            .in_flight
            .entry((cluster.to_string(), node.address()))
            .or_insert(0) += 1;
    }

    fn done(&self, cluster: &str, node: &Node) {
        if let Some(mut count) = self.in_flight.get_mut(&(cluster.to_string(), node.address())) {
            *count = count.saturating_sub(1);
        }
    }
}
