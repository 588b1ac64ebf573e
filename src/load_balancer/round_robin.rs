//! Round-robin dispatch strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cluster::Node;
use crate::load_balancer::DispatchStrategy;

/// Rotates through the available nodes, one counter per cluster.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchStrategy for RoundRobinStrategy {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn select(&self, cluster: &str, nodes: &[Node]) -> Option<Node> {
        if nodes.is_empty() {
            return None;
        }
        let counter = self.counters.entry(cluster.to_string()).or_default();
        let index = counter.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(nodes[index].clone())
    }
}
