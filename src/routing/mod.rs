//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (port, host, method, path)
//!     → matcher.rs (RequestKey built from the request)
//!     → table.rs (scan rules in order)
//!     → matcher.rs (evaluate RuleKey patterns)
//!     → Return: matched Arc<Rule> or NoMatch
//!
//! Rule changes (hot reload, programmatic):
//!     add_if_new / remove / move_up / move_down / replace_all
//!     → new vector published atomically
//!     → listening ports opened/closed through PortBinder
//! ```
//!
//! # Design Decisions
//! - Patterns compiled when the rule is built, never per request
//! - Deterministic: same input always matches same rule
//! - First match wins (table order, adjustable)
//! - Explicit NoMatch rather than silent default

pub mod matcher;
pub mod rule;
pub mod table;

pub use matcher::{RequestKey, RuleKey};
pub use rule::{Permissions, Rule, Target};
pub use table::{NoopBinder, PortBinder, RuleTable};
