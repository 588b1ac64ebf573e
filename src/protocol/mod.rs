//! Outbound protocol handling.
//!
//! # Data Flow
//! ```text
//! HTTP client stage, per attempt
//!     → factory.rs (requested protocol + permission → handler)
//!     → handler.check_upgrade_request
//!     → handler.handle(exchange, connection, destination):
//!         - http1.rs (default; CONNECT, 100-continue, HTTP/1.0)
//!         - http2.rs (h2c prior knowledge via hyper)
//!         - websocket.rs / tcp.rs (forward the Upgrade, verify the 101)
//!     → wire.rs (HTTP/1.x encoding and response framing)
//!     → Upstream (response, connection to pool or relay, upgrade state)
//! ```
//!
//! # Design Decisions
//! - Upgrades are opt-in per rule through `ALLOW_*` exchange properties
//! - A denied upgrade is a client error (403) and is never retried
//! - Bytes read past a response stay in the connection buffer, so an
//!   upgraded relay starts with whatever the backend already sent

pub mod factory;
pub mod handler;
pub mod http1;
pub mod http2;
pub mod tcp;
pub mod websocket;
pub mod wire;

pub use factory::ProtocolHandlerFactory;
pub use handler::{Destination, ProtocolHandler, Upstream};
pub use http1::Http1Handler;
pub use http2::Http2Handler;
pub use tcp::TcpUpgradeHandler;
pub use websocket::WebSocketHandler;
