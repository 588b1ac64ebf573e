//! Exchange subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (buffered)
//!     → types.rs (Exchange created, status Started)
//!     → pipeline stages mutate destinations / properties / response
//!     → control.rs (optional manual block / release / stop)
//!     → finish(): listeners notified, store entry dropped
//! ```
//!
//! # Design Decisions
//! - One exchange is handled by one worker at a time; no internal locking
//! - The matched rule is held weakly
//! - Properties are JSON values so stages can share strings or objects

pub mod control;
pub mod store;
pub mod types;

pub use control::{ControlState, ExchangeControl};
pub use store::ExchangeStore;
pub use types::{Exchange, ExchangeId, ExchangeListener, ExchangeStatus, Timestamps, UpgradeState};

/// Well-known property keys.
pub mod props {
    /// `host:port` of the node picked by the load balancer.
    pub const DISPATCHED_NODE: &str = "dispatchedNode";
    /// Cluster the dispatched node belongs to.
    pub const DISPATCHED_CLUSTER: &str = "dispatchedCluster";
    /// Session id extracted from the request.
    pub const SESSION_ID: &str = "sessionId";
    pub const ALLOW_WEBSOCKET: &str = "ALLOW_WEBSOCKET";
    pub const ALLOW_TCP: &str = "ALLOW_TCP";
    pub const ALLOW_H2C: &str = "ALLOW_H2C";
    /// Forward over HTTP/2 with prior knowledge.
    pub const USE_H2C: &str = "USE_H2C";
}
