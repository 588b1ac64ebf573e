//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! gateway, retry handler, cluster manager, node tracker
//!     → logging.rs (tracing events with exchange_id / rule / destination)
//!     → metrics.rs (gateway_exchanges_total, gateway_upstream_attempts_total,
//!                   gateway_exchange_duration_seconds, gateway_node_available)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter it is a no-op
//! - The exchange id is a field on every exchange-scoped log line

pub mod logging;
pub mod metrics;
