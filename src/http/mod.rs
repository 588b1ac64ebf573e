//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound connection (axum, one router per rule port)
//!     → server.rs (buffer body, build Exchange, run pipeline)
//!     → request.rs (request id, upgrade detection, framing checks)
//!     → [rule interceptors, dispatch]
//!     → client.rs (terminal stage: retries, protocol handlers, pool)
//!     → response.rs (hop-by-hop cleanup, error bodies)
//!     → Send to client, relay bytes if upgraded
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::HttpClientInterceptor;
pub use request::X_REQUEST_ID;
pub use server::Gateway;
