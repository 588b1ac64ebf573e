//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_exchanges_total` (counter): finished exchanges by rule, status
//! - `gateway_exchange_duration_seconds` (histogram): inbound latency
//! - `gateway_upstream_attempts_total` (counter): outbound attempts by destination, outcome
//! - `gateway_node_available` (gauge): 1=up, 0=down per cluster node
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and serves its own listener

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and HTTP exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics exporter listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
        }
    }
}

fn describe_metrics() {
    describe_counter!("gateway_exchanges_total", "Finished exchanges");
    describe_histogram!("gateway_exchange_duration_seconds", "Exchange duration in seconds");
    describe_counter!("gateway_upstream_attempts_total", "Outbound attempts");
    describe_gauge!("gateway_node_available", "Cluster node availability (1=up)");
}

/// Record a finished exchange.
pub fn record_exchange(rule: &str, status: u16, start: Instant) {
    counter!(
        "gateway_exchanges_total",
        "rule" => rule.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_exchange_duration_seconds", "rule" => rule.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one outbound attempt.
pub fn record_attempt(destination: &str, outcome: &str) {
    counter!(
        "gateway_upstream_attempts_total",
        "destination" => destination.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record node availability.
pub fn record_node_available(cluster: &str, node: &str, up: bool) {
    gauge!(
        "gateway_node_available",
        "cluster" => cluster.to_string(),
        "node" => node.to_string()
    )
    .set(if up { 1.0 } else { 0.0 });
}
