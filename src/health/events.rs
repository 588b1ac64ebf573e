//! Per-attempt health signal.
//!
//! Every outbound attempt made by the retry handler is published as an
//! [`AttemptEvent`]. Listeners only observe; they cannot change retry decisions.

use std::sync::{Arc, RwLock};

use crate::error::FailureKind;
use crate::exchange::ExchangeId;

/// Result of a single outbound attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The backend answered with a non-retryable status.
    Succeeded { status: u16 },
    /// The backend answered with a retryable server error.
    ServerError { status: u16 },
    /// The attempt failed on the wire.
    Failed { kind: FailureKind },
}

impl AttemptOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, AttemptOutcome::Succeeded { .. })
    }

    /// Label used in metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Succeeded { .. } => "success",
            AttemptOutcome::ServerError { .. } => "server_error",
            AttemptOutcome::Failed { kind } => kind.as_str(),
        }
    }
}

/// One outbound attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptEvent {
    pub exchange: ExchangeId,
    pub destination: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// Observer of outbound attempts.
pub trait AttemptListener: Send + Sync {
    fn on_attempt(&self, event: &AttemptEvent);
}

/// Fan-out to registered listeners.
#[derive(Clone, Default)]
pub struct AttemptBroadcaster {
    listeners: Arc<RwLock<Vec<Arc<dyn AttemptListener>>>>,
}

impl AttemptBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn AttemptListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn publish(&self, event: &AttemptEvent) {
        crate::observability::metrics::record_attempt(&event.destination, event.outcome.label());

        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.on_attempt(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AttemptBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptBroadcaster")
            .field("listeners", &self.len())
            .finish()
    }
}
