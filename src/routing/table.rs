//! The routing table.
//!
//! # Responsibilities
//! - Keep rules in significant order (first structural match wins)
//! - Reject duplicate rule keys
//! - Open a listening port when its first rule arrives, close it with the last
//! - Support explicit reordering and whole-table hot reload
//!
//! # Design Decisions
//! - Readers load an `ArcSwap` snapshot; they never wait for writers
//! - Writers serialize on a mutex and publish a fresh vector atomically
//! - An exchange keeps its `Arc<Rule>`; later edits do not affect it

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::GatewayResult;
use crate::routing::{RequestKey, Rule, RuleKey};

/// Opens and closes listening ports on behalf of the table.
pub trait PortBinder: Send + Sync {
    fn open(&self, port: u16) -> GatewayResult<()>;
    fn close(&self, port: u16);
}

/// Binder that does nothing (tests, embedding without listeners).
#[derive(Debug, Default)]
pub struct NoopBinder;

impl PortBinder for NoopBinder {
    fn open(&self, _port: u16) -> GatewayResult<()> {
        Ok(())
    }

    fn close(&self, _port: u16) {}
}

/// Ordered, concurrently readable rule list.
pub struct RuleTable {
    rules: ArcSwap<Vec<Arc<Rule>>>,
    writer: Mutex<()>,
    binder: Arc<dyn PortBinder>,
}

impl RuleTable {
    pub fn new(binder: Arc<dyn PortBinder>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            binder,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// First rule, in table order, that structurally matches the request.
    pub fn match_request(&self, key: &RequestKey) -> Option<Arc<Rule>> {
        self.rules.load().iter().find(|r| r.key().matches(key)).cloned()
    }

    /// Append the rule unless an equal-keyed rule exists.
    ///
    /// Opens the rule's port if no other rule uses it yet.
    pub fn add_if_new(&self, rule: impl Into<Arc<Rule>>) -> GatewayResult<bool> {
        let rule = rule.into();
        let _guard = self.lock();
        let current = self.rules.load_full();

        if current.iter().any(|r| r.key() == rule.key()) {
            tracing::debug!(rule = %rule.name(), key = %rule.key(), "Rule already present");
            return Ok(false);
        }

        let port = rule.key().port();
        if !current.iter().any(|r| r.key().port() == port) {
            self.binder.open(port)?;
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        tracing::info!(rule = %rule.name(), key = %rule.key(), "Rule added");
        next.push(rule);
        self.rules.store(Arc::new(next));
        Ok(true)
    }

    /// Remove the rule with this key. Closes its port if now unused.
    pub fn remove(&self, key: &RuleKey) -> bool {
        let _guard = self.lock();
        let current = self.rules.load_full();

        let Some(index) = current.iter().position(|r| r.key() == key) else {
            return false;
        };

        let mut next: Vec<Arc<Rule>> = current.iter().cloned().collect();
        let removed = next.remove(index);
        let port = removed.key().port();
        self.rules.store(Arc::new(next.clone()));

        if !next.iter().any(|r| r.key().port() == port) {
            self.binder.close(port);
        }
        tracing::info!(rule = %removed.name(), key = %key, "Rule removed");
        true
    }

    /// Remove every rule and close every port.
    pub fn remove_all(&self) {
        let _guard = self.lock();
        let previous = self.rules.swap(Arc::new(Vec::new()));
        for port in ports_of(&previous) {
            self.binder.close(port);
        }
        tracing::info!(count = previous.len(), "All rules removed");
    }

    /// Swap the rule with its predecessor. Returns false at the top or if unknown.
    pub fn move_up(&self, key: &RuleKey) -> bool {
        self.swap_with_neighbour(key, true)
    }

    /// Swap the rule with its successor. Returns false at the bottom or if unknown.
    pub fn move_down(&self, key: &RuleKey) -> bool {
        self.swap_with_neighbour(key, false)
    }

    fn swap_with_neighbour(&self, key: &RuleKey, up: bool) -> bool {
        let _guard = self.lock();
        let current = self.rules.load_full();

        let Some(index) = current.iter().position(|r| r.key() == key) else {
            return false;
        };
        let other = if up {
            match index.checked_sub(1) {
                Some(i) => i,
                None => return false,
            }
        } else if index + 1 < current.len() {
            index + 1
        } else {
            return false;
        };

        let mut next: Vec<Arc<Rule>> = current.iter().cloned().collect();
        next.swap(index, other);
        self.rules.store(Arc::new(next));
        true
    }

    /// Replace the whole table (hot reload). Duplicate keys keep the first rule.
    ///
    /// Ports are opened before the new table is published; if opening fails
    /// the old table stays in place.
    pub fn replace_all(&self, rules: Vec<Arc<Rule>>) -> GatewayResult<()> {
        let _guard = self.lock();
        let current = self.rules.load_full();

        let mut next: Vec<Arc<Rule>> = Vec::with_capacity(rules.len());
        for rule in rules {
            if next.iter().any(|r| r.key() == rule.key()) {
                tracing::warn!(rule = %rule.name(), key = %rule.key(), "Duplicate rule key ignored");
                continue;
            }
            next.push(rule);
        }

        let old_ports = ports_of(&current);
        let new_ports = ports_of(&next);

        let mut opened = Vec::new();
        for port in new_ports.difference(&old_ports) {
            if let Err(e) = self.binder.open(*port) {
                for port in opened {
                    self.binder.close(port);
                }
                return Err(e);
            }
            opened.push(*port);
        }

        let count = next.len();
        self.rules.store(Arc::new(next));

        for port in old_ports.difference(&new_ports) {
            self.binder.close(*port);
        }
        tracing::info!(count, "Rule table replaced");
        Ok(())
    }

    /// Snapshot of the rules in order.
    pub fn rules(&self) -> Arc<Vec<Arc<Rule>>> {
        self.rules.load_full()
    }

    /// Ports currently used by at least one rule.
    pub fn ports(&self) -> HashSet<u16> {
        ports_of(&self.rules.load())
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.load().is_empty()
    }
}

fn ports_of(rules: &[Arc<Rule>]) -> HashSet<u16> {
    rules.iter().map(|r| r.key().port()).collect()
}
