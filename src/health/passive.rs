//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe outbound attempt outcomes
//! - Track consecutive failures per cluster node
//! - Take a node down when the threshold is reached, revive it later
//!
//! # Design Decisions
//! - Transport errors and retryable 5xx count as failures
//! - 4xx are NOT failures (client error, not backend)
//! - Only nodes this tracker took down are revived; a node downed through
//!   the notification endpoint stays down

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;

use crate::cluster::{authority, normalize_host, ClusterManager};
use crate::config::HealthConfig;
use crate::health::events::{AttemptEvent, AttemptListener};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

type NodeKey = (String, String, u16);

pub struct NodeFailureTracker {
    manager: Arc<ClusterManager>,
    failure_threshold: u32,
    revive_after: Duration,
    downed: DashMap<NodeKey, Instant>,
}

impl NodeFailureTracker {
    pub fn new(manager: Arc<ClusterManager>, failure_threshold: u32, revive_after: Duration) -> Self {
        Self {
            manager,
            failure_threshold: failure_threshold.max(1),
            revive_after,
            downed: DashMap::new(),
        }
    }

    pub fn from_config(manager: Arc<ClusterManager>, config: &HealthConfig) -> Self {
        Self::new(
            manager,
            config.failure_threshold,
            Duration::from_secs(config.revive_after_secs),
        )
    }

    /// Nodes currently held down by this tracker.
    pub fn downed(&self) -> Vec<(String, String, u16)> {
        self.downed.iter().map(|e| e.key().clone()).collect()
    }

    /// Bring back every node whose quarantine ended at `now`.
    pub fn revive_due(&self, now: Instant) -> usize {
        let due: Vec<NodeKey> = self
            .downed
            .iter()
            .filter(|e| now.saturating_duration_since(*e.value()) >= self.revive_after)
            .map(|e| e.key().clone())
            .collect();

        let mut revived = 0;
        for key in due {
            self.downed.remove(&key);
            let (cluster, host, port) = key;
            let still_down = self
                .manager
                .node(&cluster, &host, port)
                .map(|n| !n.is_up())
                .unwrap_or(false);
            if still_down {
                self.manager.up(&cluster, &host, port);
                metrics::record_node_available(&cluster, &authority(&host, port), true);
                tracing::info!(cluster = %cluster, host = %host, port, "Node revived after quarantine");
                revived += 1;
            }
        }
        revived
    }

    /// Revive loop. Runs until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: Shutdown) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            revive_after_secs = self.revive_after.as_secs(),
            "Node failure tracker starting"
        );

        let mut ticker = time::interval(interval.max(Duration::from_millis(10)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.revive_due(Instant::now());
                }
                _ = shutdown.wait() => {
                    tracing::info!("Node failure tracker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn failed(&self, cluster: &str, host: &str, port: u16) {
        let count = self.manager.node_failed(cluster, host, port);
        if count < self.failure_threshold || !self.manager.is_available(cluster, host, port) {
            return;
        }
        if self.manager.down(cluster, host, port) {
            self.downed
                .insert((cluster.to_string(), host.to_string(), port), Instant::now());
            metrics::record_node_available(cluster, &authority(host, port), false);
            tracing::warn!(
                cluster = %cluster,
                host = %host,
                port,
                consecutive_failures = count,
                "Node taken down after consecutive failures"
            );
        }
    }
}

impl AttemptListener for NodeFailureTracker {
    fn on_attempt(&self, event: &AttemptEvent) {
        let Ok(url) = url::Url::parse(&event.destination) else {
            return;
        };
        let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
            return;
        };
        let host = normalize_host(host);

        for cluster in self.manager.clusters_of(host, port) {
            if event.outcome.is_failure() {
                self.failed(&cluster, host, port);
            } else {
                self.manager.node_succeeded(&cluster, host, port);
            }
        }
    }
}

impl std::fmt::Debug for NodeFailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFailureTracker")
            .field("failure_threshold", &self.failure_threshold)
            .field("revive_after", &self.revive_after)
            .field("downed", &self.downed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::exchange::ExchangeId;
    use crate::health::events::AttemptOutcome;

    fn event(destination: &str, outcome: AttemptOutcome) -> AttemptEvent {
        AttemptEvent {
            exchange: ExchangeId::new(),
            destination: destination.to_string(),
            attempt: 0,
            outcome,
        }
    }

    fn refused() -> AttemptOutcome {
        AttemptOutcome::Failed {
            kind: FailureKind::ConnectionRefused,
        }
    }

    fn setup() -> (Arc<ClusterManager>, NodeFailureTracker) {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        manager.up("c", "a", 8080);
        let tracker = NodeFailureTracker::new(manager.clone(), 2, Duration::from_secs(30));
        (manager, tracker)
    }

    #[test]
    fn threshold_takes_node_down() {
        let (manager, tracker) = setup();

        tracker.on_attempt(&event("http://a:8080/x", refused()));
        assert!(manager.is_available("c", "a", 8080));

        tracker.on_attempt(&event("http://a:8080/x", refused()));
        assert!(!manager.is_available("c", "a", 8080));
        assert_eq!(tracker.downed().len(), 1);
    }

    #[test]
    fn success_resets_failure_streak() {
        let (manager, tracker) = setup();

        tracker.on_attempt(&event("http://a:8080/", refused()));
        tracker.on_attempt(&event("http://a:8080/", AttemptOutcome::Succeeded { status: 200 }));
        tracker.on_attempt(&event("http://a:8080/", refused()));

        assert!(manager.is_available("c", "a", 8080));
        assert_eq!(manager.node("c", "a", 8080).unwrap().failures(), 2);
    }

    #[test]
    fn unknown_destinations_are_ignored() {
        let (manager, tracker) = setup();
        for _ in 0..5 {
            tracker.on_attempt(&event("http://elsewhere:8080/", refused()));
            tracker.on_attempt(&event("not a url", refused()));
        }
        assert!(manager.is_available("c", "a", 8080));
    }

    #[test]
    fn revives_only_after_quarantine() {
        let (manager, tracker) = setup();
        tracker.on_attempt(&event("http://a:8080/", refused()));
        tracker.on_attempt(&event("http://a:8080/", refused()));

        let now = Instant::now();
        assert_eq!(tracker.revive_due(now), 0);
        assert_eq!(tracker.revive_due(now + Duration::from_secs(31)), 1);
        assert!(manager.is_available("c", "a", 8080));
        assert!(tracker.downed().is_empty());
    }

    #[test]
    fn admin_down_is_not_revived() {
        let (manager, tracker) = setup();
        manager.down("c", "a", 8080);

        tracker.on_attempt(&event("http://a:8080/", refused()));
        tracker.on_attempt(&event("http://a:8080/", refused()));
        assert!(tracker.downed().is_empty());

        tracker.revive_due(Instant::now() + Duration::from_secs(3600));
        assert!(!manager.is_available("c", "a", 8080));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_, tracker) = setup();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(Arc::new(tracker).run(Duration::from_millis(10), shutdown.clone()));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn ipv6_destinations_match_their_node() {
        let manager = Arc::new(ClusterManager::new(Duration::ZERO));
        manager.up("c", "[::1]", 8080);
        let tracker = NodeFailureTracker::new(manager.clone(), 1, Duration::from_secs(30));

        tracker.on_attempt(&event("http://[::1]:8080/svc", refused()));
        assert!(!manager.is_available("c", "::1", 8080));
        assert_eq!(tracker.downed(), vec![("c".to_string(), "::1".to_string(), 8080)]);
    }
}
