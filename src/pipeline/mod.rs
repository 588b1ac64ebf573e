//! Interceptor pipeline.
//!
//! # Data Flow
//! ```text
//! rule.interceptors ─┐
//! [blocking]         ├─ request pass (push, handle_request) ──┐
//! dispatch           │                                       │
//! http client ───────┘                                       ▼
//!                               response pass (pop, handle_response)
//!                               or abort pass (pop, handle_abort)
//! ```
//!
//! # Design Decisions
//! - Stages are `Arc<dyn Interceptor>` shared across exchanges; per-exchange
//!   state lives on the exchange
//! - The stack lives on the exchange, so only stages that ran are unwound
//! - An interceptor error never escapes the executor

pub mod blocking;
pub mod dispatch;
pub mod executor;
pub mod interceptor;

pub use blocking::BlockingInterceptor;
pub use dispatch::DispatchInterceptor;
pub use executor::PipelineExecutor;
pub use interceptor::{Interceptor, Outcome};
