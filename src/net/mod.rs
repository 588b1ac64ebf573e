//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     rule table opens a port
//!     → listener.rs (bind, axum server per port)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     pool.rs (idle keep-alive connection?)
//!     → connection.rs (resolve, connect, timed reads)
//!     → protocol handlers
//! ```
//!
//! # Design Decisions
//! - Ports follow the rule table; no rule, no listener
//! - Outbound failures are classified where they happen
//! - A connection goes back to the pool only after a clean response

pub mod connection;
pub mod listener;
pub mod pool;

pub use connection::{Connection, ConnectionId};
pub use listener::{ListenerRegistry, RouterFactory};
pub use pool::ConnectionPool;
