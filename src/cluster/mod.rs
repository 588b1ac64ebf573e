//! Cluster subsystem.
//!
//! # Data Flow
//! ```text
//! Backend announces itself:
//!     GET /clustermanager/up?host=..&port=..
//!     → notification.rs (decode, validate)
//!     → manager.rs (insert / revive / down / takeout)
//!
//! Load balancer:
//!     → manager.rs available_nodes (up and not stale)
//!     → manager.rs session / bind_session (stickiness)
//! ```
//!
//! # Design Decisions
//! - Nodes are identified by host (case-insensitive) and port
//! - Staleness is evaluated at query time; nothing is evicted eagerly
//! - Sessions point at an address, not a node record, so they survive takeout

pub mod manager;
pub mod node;
pub mod notification;

pub use manager::{ClusterManager, DEFAULT_CLUSTER};
pub use node::{authority, normalize_host, Node, NodeStatus, Session};
pub use notification::{ClusterNotificationInterceptor, PayloadDecoder, EncryptedPayloadDecoder};
