//! Keep-alive pool of idle backend connections.
//!
//! # Design Decisions
//! - Keyed by `host:port`
//! - A connection is returned only after a complete keep-alive response with
//!   nothing left in its read buffer; any error drops it
//! - Idle entries expire after the configured idle time

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::net::connection::{pool_key, Connection};

struct Idle {
    connection: Connection,
    since: Instant,
}

pub struct ConnectionPool {
    idle: DashMap<String, Vec<Idle>>,
    idle_timeout: Duration,
    max_idle_per_host: usize,
}

impl ConnectionPool {
    pub fn new(idle_timeout: Duration, max_idle_per_host: usize) -> Self {
        Self {
            idle: DashMap::new(),
            idle_timeout,
            max_idle_per_host,
        }
    }

    /// Take an idle connection to `host:port`, if a fresh one exists.
    pub fn acquire(&self, host: &str, port: u16, read_timeout: Duration) -> Option<Connection> {
        let key = pool_key(host, port);
        let mut entry = self.idle.get_mut(&key)?;
        while let Some(idle) = entry.pop() {
            if idle.since.elapsed() < self.idle_timeout {
                let mut connection = idle.connection;
                connection.mark_reused();
                connection.set_read_timeout(read_timeout);
                tracing::trace!(connection_id = %connection.id(), destination = %key, "Reusing pooled connection");
                return Some(connection);
            }
        }
        None
    }

    /// Return a connection after a clean keep-alive response.
    pub fn release(&self, connection: Connection) {
        if self.idle_timeout.is_zero() || !connection.buffer().is_empty() {
            return;
        }
        let mut entry = self.idle.entry(connection.key()).or_default();
        entry.retain(|idle| idle.since.elapsed() < self.idle_timeout);
        if entry.len() < self.max_idle_per_host {
            entry.push(Idle {
                connection,
                since: Instant::now(),
            });
        }
    }

    /// Number of idle connections across all hosts.
    pub fn idle_count(&self) -> usize {
        self.idle.iter().map(|e| e.value().len()).sum()
    }

    /// Drop every idle connection.
    pub fn clear(&self) {
        self.idle.clear();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle_count())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
