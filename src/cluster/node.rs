//! Cluster members and sticky sessions.

use std::time::{Duration, Instant};

/// Host without the brackets of an IPv6 literal.
pub fn normalize_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// `host:port`, with IPv6 literals bracketed.
pub fn authority(host: &str, port: u16) -> String {
    let host = normalize_host(host);
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Availability of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Up,
    Down,
}

/// One backend instance of a cluster.
#[derive(Debug, Clone)]
pub struct Node {
    host: String,
    port: u16,
    status: NodeStatus,
    last_seen: Instant,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host: String = host.into();
        Self {
            host: normalize_host(&host).to_string(),
            port,
            status: NodeStatus::Up,
            last_seen: Instant::now(),
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`; IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        authority(&self.host, self.port)
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_up(&self) -> bool {
        self.status == NodeStatus::Up
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Same host (case-insensitive) and port.
    pub fn is(&self, host: &str, port: u16) -> bool {
        self.port == port && self.host.eq_ignore_ascii_case(normalize_host(host))
    }

    /// Not seen within `timeout`. A zero timeout never goes stale.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        !timeout.is_zero() && now.saturating_duration_since(self.last_seen) >= timeout
    }

    /// Up and not stale.
    pub fn is_available(&self, now: Instant, timeout: Duration) -> bool {
        self.is_up() && !self.is_stale(now, timeout)
    }

    pub(crate) fn mark_up(&mut self) {
        self.status = NodeStatus::Up;
        self.last_seen = Instant::now();
        self.consecutive_failures = 0;
    }

    pub(crate) fn mark_down(&mut self) {
        self.status = NodeStatus::Down;
    }

    pub(crate) fn record_success(&mut self) {
        self.successes += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self) -> u32 {
        self.failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, at: Instant) {
        self.last_seen = at;
    }
}

/// Sticky binding of a session id to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub last_used: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, node: &Node) -> Self {
        Self {
            id: id.into(),
            host: node.host().to_string(),
            port: node.port(),
            last_used: Instant::now(),
        }
    }

    pub fn address(&self) -> String {
        authority(&self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_boundary_is_inclusive() {
        let node = Node::new("n1", 80);
        let seen = node.last_seen();
        let timeout = Duration::from_secs(10);

        assert!(!node.is_stale(seen + Duration::from_secs(9), timeout));
        assert!(node.is_stale(seen + timeout, timeout));
        assert!(!node.is_stale(seen + Duration::from_secs(3600), Duration::ZERO));
    }

    #[test]
    fn failures_reset_on_success_and_revival() {
        let mut node = Node::new("n1", 80);
        assert_eq!(node.record_failure(), 1);
        assert_eq!(node.record_failure(), 2);
        node.record_success();
        assert_eq!(node.consecutive_failures(), 0);
        assert_eq!(node.failures(), 2);

        node.record_failure();
        node.mark_down();
        assert!(!node.is_up());
        node.mark_up();
        assert!(node.is_up());
        assert_eq!(node.consecutive_failures(), 0);
    }

    #[test]
    fn identity_ignores_host_case() {
        let node = Node::new("Node1.local", 8080);
        assert!(node.is("node1.LOCAL", 8080));
        assert!(!node.is("node1.local", 8081));
        assert_eq!(node.address(), "Node1.local:8080");
    }

    #[test]
    fn ipv6_hosts_are_bracketed_once() {
        let node = Node::new("[::1]", 8080);
        assert_eq!(node.host(), "::1");
        assert_eq!(node.address(), "[::1]:8080");
        assert!(node.is("::1", 8080));
        assert!(node.is("[::1]", 8080));
        assert_eq!(Session::new("s", &node).address(), "[::1]:8080");
        assert_eq!(authority("n1", 80), "n1:80");
    }
}
