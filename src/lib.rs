//! HTTP/SOAP API gateway: routing and dispatch engine.

pub mod cluster;
pub mod config;
pub mod error;
pub mod exchange;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::Gateway;
pub use lifecycle::Shutdown;
