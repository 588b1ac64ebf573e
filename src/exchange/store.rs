//! Registry of exchanges waiting for manual release.

use dashmap::DashMap;
use std::sync::Arc;

use crate::exchange::{ExchangeControl, ExchangeId};

/// Thread-safe map of exchange id -> control handle.
#[derive(Debug, Clone, Default)]
pub struct ExchangeStore {
    inner: Arc<DashMap<ExchangeId, ExchangeControl>>,
}

impl ExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ExchangeId, control: ExchangeControl) {
        self.inner.insert(id, control);
    }

    pub fn unregister(&self, id: &ExchangeId) {
        self.inner.remove(id);
    }

    /// Release a blocked exchange. Returns false if unknown or not blocked.
    pub fn release(&self, id: &ExchangeId) -> bool {
        self.inner
            .get(id)
            .map(|control| control.release())
            .unwrap_or(false)
    }

    /// Force-stop an exchange. Returns false if unknown.
    pub fn stop(&self, id: &ExchangeId) -> bool {
        match self.inner.get(id) {
            Some(control) => {
                control.force_stop();
                true
            }
            None => false,
        }
    }

    /// Ids of currently blocked exchanges.
    pub fn blocked(&self) -> Vec<ExchangeId> {
        self.inner
            .iter()
            .filter(|entry| entry.value().is_blocked())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
