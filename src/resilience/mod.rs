//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP client stage:
//!     → retries.rs (pick destination, run attempt, classify failure)
//!         → timeouts.rs (connect / read deadlines inside each attempt)
//!         → backoff.rs (delay before the next attempt on one destination)
//!     → health events published per attempt
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound read has a deadline
//! - Only the retry handler re-attempts; every other error ends the exchange
//! - Mutating requests are not replayed against a backend that may have seen them

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{AttemptFailure, AttemptResponse, RetryContext, RetryHandler, RetryResult};
