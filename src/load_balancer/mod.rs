//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Rule with a cluster target
//!     → interceptor.rs (LoadBalancingInterceptor)
//!         → extractor.rs (session id from header, cookie or body)
//!         → ClusterManager session lookup (sticky node, if still available)
//!         → otherwise a strategy picks among available nodes:
//!             - round_robin.rs (rotate through nodes)
//!             - least_conn.rs (fewest dispatches in flight)
//!     → exchange destinations: chosen node first, then the rest
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless with respect to cluster membership; they only
//!   see the available nodes handed to them
//! - Down and stale nodes never reach a strategy
//! - In-flight accounting lives in the strategy, bracketed by begin/done

pub mod extractor;
pub mod interceptor;
pub mod least_conn;
pub mod round_robin;
pub mod strategy;

pub use extractor::{
    BodyPatternSessionIdExtractor, CookieSessionIdExtractor, HeaderSessionIdExtractor, Phase,
    SessionIdExtractor,
};
pub use interceptor::LoadBalancingInterceptor;
pub use least_conn::LeastInFlightStrategy;
pub use round_robin::RoundRobinStrategy;
pub use strategy::DispatchStrategy;
