//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Retry handler makes an outbound attempt
//!     → events.rs (AttemptEvent published to listeners, metrics recorded)
//!     → passive.rs (NodeFailureTracker)
//!         → consecutive failures ≥ threshold → ClusterManager::down
//!         → revive loop → ClusterManager::up after the quarantine
//! ```
//!
//! # Design Decisions
//! - Health is derived from real traffic only; there are no probes
//! - Listeners observe attempts and never influence retry decisions
//! - Health state is per cluster node, not per destination URL

pub mod events;
pub mod passive;

pub use events::{AttemptBroadcaster, AttemptEvent, AttemptListener, AttemptOutcome};
pub use passive::NodeFailureTracker;
