//! Cluster registry.
//!
//! # Responsibilities
//! - Track node membership and up/down status per cluster
//! - Exclude stale nodes (not announced within the node timeout)
//! - Hold sticky session bindings per cluster
//! - Keep per-node success / failure counters for passive health
//!
//! # Design Decisions
//! - Clusters live in a `DashMap`; each has an `RwLock` node list and a
//!   `DashMap` of sessions, so every critical section is one map update
//! - Queries return cloned snapshots; callers never hold a lock
//! - `up` creates missing clusters; the other mutators ignore unknown ones

use dashmap::DashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::cluster::node::{authority, Node, Session};
use crate::observability::metrics;

/// Name used when a notification names no cluster.
pub const DEFAULT_CLUSTER: &str = "Default";

#[derive(Debug, Default)]
struct Cluster {
    nodes: RwLock<Vec<Node>>,
    sessions: DashMap<String, Session>,
}

impl Cluster {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Node>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> Vec<Node> {
        self.read().clone()
    }

    fn find(&self, host: &str, port: u16) -> Option<Node> {
        self.read().iter().find(|n| n.is(host, port)).cloned()
    }

    fn available(&self, now: Instant, timeout: Duration) -> Vec<Node> {
        self.read()
            .iter()
            .filter(|n| n.is_available(now, timeout))
            .cloned()
            .collect()
    }
}

/// Thread-safe registry of clusters, nodes and sessions.
#[derive(Debug, Default)]
pub struct ClusterManager {
    clusters: DashMap<String, Arc<Cluster>>,
    node_timeout: Duration,
}

impl ClusterManager {
    /// `node_timeout` of zero disables stale-node eviction.
    pub fn new(node_timeout: Duration) -> Self {
        Self {
            clusters: DashMap::new(),
            node_timeout,
        }
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    fn cluster(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(name).map(|c| c.value().clone())
    }

    fn cluster_or_create(&self, name: &str) -> Arc<Cluster> {
        self.clusters
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(cluster = %name, "Cluster created");
                Arc::new(Cluster::default())
            })
            .value()
            .clone()
    }

    /// Create an empty cluster. Returns false if it existed.
    pub fn add_cluster(&self, name: &str) -> bool {
        if self.clusters.contains_key(name) {
            return false;
        }
        self.cluster_or_create(name);
        true
    }

    /// Names of all clusters, sorted.
    pub fn clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Insert the node or bring it back up. Refreshes last-seen.
    pub fn up(&self, cluster: &str, host: &str, port: u16) {
        let entry = self.cluster_or_create(cluster);
        let mut nodes = entry.write();
        match nodes.iter_mut().find(|n| n.is(host, port)) {
            Some(node) => {
                if !node.is_up() {
                    tracing::info!(cluster = %cluster, node = %node.address(), "Node up");
                }
                node.mark_up();
            }
            None => {
                let node = Node::new(host, port);
                tracing::info!(cluster = %cluster, node = %node.address(), "Node added");
                nodes.push(node);
            }
        }
        metrics::record_node_available(cluster, &authority(host, port), true);
    }

    /// Mark the node unavailable without forgetting it.
    pub fn down(&self, cluster: &str, host: &str, port: u16) -> bool {
        let Some(entry) = self.cluster(cluster) else {
            return false;
        };
        let mut nodes = entry.write();
        match nodes.iter_mut().find(|n| n.is(host, port)) {
            Some(node) => {
                node.mark_down();
                tracing::info!(cluster = %cluster, node = %node.address(), "Node down");
                metrics::record_node_available(cluster, &node.address(), false);
                true
            }
            None => false,
        }
    }

    /// Remove the node from the cluster.
    pub fn takeout(&self, cluster: &str, host: &str, port: u16) -> bool {
        let Some(entry) = self.cluster(cluster) else {
            return false;
        };
        let mut nodes = entry.write();
        let before = nodes.len();
        nodes.retain(|n| !n.is(host, port));
        let removed = nodes.len() != before;
        if removed {
            tracing::info!(cluster = %cluster, node = %authority(host, port), "Node taken out");
            metrics::record_node_available(cluster, &authority(host, port), false);
        }
        removed
    }

    /// Nodes that are up and not stale.
    pub fn available_nodes(&self, cluster: &str) -> Vec<Node> {
        self.available_nodes_at(cluster, Instant::now())
    }

    /// `available_nodes` evaluated at a given instant.
    pub fn available_nodes_at(&self, cluster: &str, now: Instant) -> Vec<Node> {
        self.cluster(cluster)
            .map(|c| c.available(now, self.node_timeout))
            .unwrap_or_default()
    }

    /// Whether the node is currently available.
    pub fn is_available(&self, cluster: &str, host: &str, port: u16) -> bool {
        self.cluster(cluster)
            .and_then(|c| c.find(host, port))
            .map(|n| n.is_available(Instant::now(), self.node_timeout))
            .unwrap_or(false)
    }

    /// Every node, regardless of status.
    pub fn all_nodes(&self, cluster: &str) -> Vec<Node> {
        self.cluster(cluster)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Single node snapshot.
    pub fn node(&self, cluster: &str, host: &str, port: u16) -> Option<Node> {
        self.cluster(cluster).and_then(|c| c.find(host, port))
    }

    /// Clusters containing a node with this address.
    pub fn clusters_of(&self, host: &str, port: u16) -> Vec<String> {
        self.clusters
            .iter()
            .filter(|e| e.value().read().iter().any(|n| n.is(host, port)))
            .map(|e| e.key().clone())
            .collect()
    }

    // --- Counters ---

    pub fn node_succeeded(&self, cluster: &str, host: &str, port: u16) {
        if let Some(entry) = self.cluster(cluster) {
            if let Some(node) = entry.write().iter_mut().find(|n| n.is(host, port)) {
                node.record_success();
            }
        }
    }

    /// Record a failure and return the consecutive failure count.
    pub fn node_failed(&self, cluster: &str, host: &str, port: u16) -> u32 {
        let Some(entry) = self.cluster(cluster) else {
            return 0;
        };
        let mut nodes = entry.write();
        let count = nodes
            .iter_mut()
            .find(|n| n.is(host, port))
            .map(|node| node.record_failure())
            .unwrap_or(0);
        count
    }

    // --- Sessions ---

    /// Session bound to `id`; refreshes its last-used instant.
    pub fn session(&self, cluster: &str, id: &str) -> Option<Session> {
        let entry = self.cluster(cluster)?;
        let mut session = entry.sessions.get_mut(id)?;
        session.last_used = Instant::now();
        Some(session.clone())
    }

    /// Bind `id` to `node`, replacing any earlier binding.
    pub fn bind_session(&self, cluster: &str, id: &str, node: &Node) {
        let entry = self.cluster_or_create(cluster);
        tracing::debug!(cluster = %cluster, session_id = %id, node = %node.address(), "Session bound");
        entry.sessions.insert(id.to_string(), Session::new(id, node));
    }

    /// Snapshot of the sessions of a cluster.
    pub fn sessions(&self, cluster: &str) -> Vec<Session> {
        self.cluster(cluster)
            .map(|c| c.sessions.iter().map(|s| s.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn remove_session(&self, cluster: &str, id: &str) -> bool {
        self.cluster(cluster)
            .map(|c| c.sessions.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Drop sessions unused for at least `age`, across all clusters.
    pub fn purge_sessions_older_than(&self, age: Duration) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for entry in self.clusters.iter() {
            let sessions = &entry.value().sessions;
            let before = sessions.len();
            sessions.retain(|_, s| now.saturating_duration_since(s.last_used) < age);
            purged += before - sessions.len();
        }
        if purged > 0 {
            tracing::debug!(purged, "Expired sessions purged");
        }
        purged
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, cluster: &str, host: &str, port: u16, at: Instant) {
        if let Some(entry) = self.cluster(cluster) {
            if let Some(node) = entry.write().iter_mut().find(|n| n.is(host, port)) {
                node.set_last_seen(at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(nodes: &[Node]) -> Vec<String> {
        nodes.iter().map(Node::address).collect()
    }

    #[test]
    fn up_is_idempotent_and_creates_cluster() {
        let manager = ClusterManager::new(Duration::ZERO);
        manager.up("c", "n1", 80);
        manager.up("c", "n1", 80);
        manager.up("c", "N1", 80);

        assert_eq!(manager.clusters(), vec!["c"]);
        assert_eq!(manager.all_nodes("c").len(), 1);
    }

    #[test]
    fn down_keeps_node_takeout_removes_it() {
        let manager = ClusterManager::new(Duration::ZERO);
        manager.up("c", "n1", 80);
        manager.up("c", "n2", 80);

        assert!(manager.down("c", "n1", 80));
        assert_eq!(addresses(&manager.available_nodes("c")), vec!["n2:80"]);
        assert_eq!(manager.all_nodes("c").len(), 2);

        manager.up("c", "n1", 80);
        assert_eq!(manager.available_nodes("c").len(), 2);

        assert!(manager.takeout("c", "n1", 80));
        assert!(!manager.takeout("c", "n1", 80));
        assert_eq!(addresses(&manager.all_nodes("c")), vec!["n2:80"]);

        assert!(!manager.down("missing", "n1", 80));
    }

    #[test]
    fn stale_nodes_are_excluded() {
        let manager = ClusterManager::new(Duration::from_secs(10));
        manager.up("c", "n1", 80);
        manager.up("c", "n2", 80);
        let seen = manager.node("c", "n1", 80).unwrap().last_seen();
        manager.set_last_seen("c", "n2", 80, seen);

        let soon = seen + Duration::from_secs(5);
        assert_eq!(manager.available_nodes_at("c", soon).len(), 2);

        let later = seen + Duration::from_secs(10);
        assert!(manager.available_nodes_at("c", later).is_empty());

        // Announcing again refreshes last-seen.
        manager.up("c", "n1", 80);
        let refreshed = manager.node("c", "n1", 80).unwrap().last_seen();
        assert_eq!(
            addresses(&manager.available_nodes_at("c", refreshed + Duration::from_secs(1))),
            vec!["n1:80"]
        );
    }

    #[test]
    fn sessions_bind_and_purge() {
        let manager = ClusterManager::new(Duration::ZERO);
        manager.up("c", "n1", 80);
        let node = manager.node("c", "n1", 80).unwrap();

        assert!(manager.session("c", "s1").is_none());
        manager.bind_session("c", "s1", &node);
        assert_eq!(manager.session("c", "s1").unwrap().address(), "n1:80");
        assert_eq!(manager.sessions("c").len(), 1);

        assert_eq!(manager.purge_sessions_older_than(Duration::from_secs(60)), 0);
        assert_eq!(manager.purge_sessions_older_than(Duration::ZERO), 1);
        assert!(manager.sessions("c").is_empty());

        manager.bind_session("c", "s2", &node);
        assert!(manager.remove_session("c", "s2"));
        assert!(!manager.remove_session("c", "s2"));
    }

    #[test]
    fn counters_track_consecutive_failures() {
        let manager = ClusterManager::new(Duration::ZERO);
        manager.up("a", "n1", 80);
        manager.up("b", "n1", 80);

        assert_eq!(manager.node_failed("a", "n1", 80), 1);
        assert_eq!(manager.node_failed("a", "n1", 80), 2);
        manager.node_succeeded("a", "n1", 80);
        assert_eq!(manager.node("a", "n1", 80).unwrap().consecutive_failures(), 0);
        assert_eq!(manager.node_failed("a", "unknown", 80), 0);

        let mut clusters = manager.clusters_of("n1", 80);
        clusters.sort();
        assert_eq!(clusters, vec!["a", "b"]);
    }
}
