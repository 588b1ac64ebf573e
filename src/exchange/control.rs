//! Manual release and forced stop of an in-flight exchange.
//!
//! A worker may park an exchange with [`ExchangeControl::block`] until an
//! external party calls [`ExchangeControl::release`]. A forced stop wakes the
//! worker and makes `block` return [`GatewayError::Terminated`].

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{GatewayError, GatewayResult};

/// Control state of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Running,
    Blocked,
    Released,
    Stopped,
}

/// Cloneable handle shared between the worker and external controllers.
#[derive(Debug, Clone)]
pub struct ExchangeControl {
    tx: Arc<watch::Sender<ControlState>>,
}

impl ExchangeControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ControlState::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> ControlState {
        *self.tx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ControlState::Stopped
    }

    pub fn is_blocked(&self) -> bool {
        self.state() == ControlState::Blocked
    }

    /// Park the calling worker until released or stopped.
    pub async fn block(&self) -> GatewayResult<()> {
        let mut rx = self.tx.subscribe();

        let mut stopped = false;
        self.tx.send_modify(|state| {
            if *state == ControlState::Stopped {
                stopped = true;
            } else {
                *state = ControlState::Blocked;
            }
        });
        if stopped {
            return Err(GatewayError::Terminated);
        }

        loop {
            let current = *rx.borrow_and_update();
            match current {
                ControlState::Released => {
                    self.tx.send_if_modified(|state| {
                        if *state == ControlState::Released {
                            *state = ControlState::Running;
                            true
                        } else {
                            false
                        }
                    });
                    return Ok(());
                }
                ControlState::Stopped => return Err(GatewayError::Terminated),
                ControlState::Running | ControlState::Blocked => {}
            }
            if rx.changed().await.is_err() {
                return Err(GatewayError::Terminated);
            }
        }
    }

    /// Resume a blocked worker. Returns false if nothing was blocked.
    pub fn release(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ControlState::Blocked {
                *state = ControlState::Released;
                true
            } else {
                false
            }
        })
    }

    /// Stop the exchange, waking a blocked worker.
    pub fn force_stop(&self) {
        self.tx.send_replace(ControlState::Stopped);
    }
}

impl Default for ExchangeControl {
    fn default() -> Self {
        Self::new()
    }
}
