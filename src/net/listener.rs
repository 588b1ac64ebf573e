//! Per-port inbound listeners.
//!
//! # Responsibilities
//! - Bind a port when the rule table asks for it and serve it with axum
//! - Stop serving a port when its last rule is removed
//! - Stop every listener on shutdown
//!
//! # Design Decisions
//! - Binding is synchronous (std listener, then handed to tokio), so a bind
//!   failure surfaces to the caller of `add_if_new` / `replace_all`
//! - Each port gets its own router built by the installed factory
//! - Closing a port stops accepting immediately; in-flight exchanges finish

use axum::Router;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, GatewayResult};
use crate::lifecycle::Shutdown;
use crate::routing::PortBinder;

/// Builds the router served on a port.
pub type RouterFactory = Arc<dyn Fn(u16) -> Router + Send + Sync>;

struct Served {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Opens and closes axum servers on behalf of the rule table.
pub struct ListenerRegistry {
    bind_host: String,
    servers: DashMap<u16, Served>,
    factory: OnceLock<RouterFactory>,
    shutdown: Shutdown,
}

impl ListenerRegistry {
    pub fn new(bind_host: impl Into<String>, shutdown: Shutdown) -> Self {
        Self {
            bind_host: bind_host.into(),
            servers: DashMap::new(),
            factory: OnceLock::new(),
            shutdown,
        }
    }

    /// Install the router factory. Only the first call has an effect.
    pub fn set_router_factory(&self, factory: RouterFactory) {
        let _ = self.factory.set(factory);
    }

    /// Address a port is actually bound to.
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.servers.get(&port).map(|s| s.local_addr)
    }

    /// Ports currently served.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.servers.iter().map(|e| *e.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Stop every listener.
    pub fn close_all(&self) {
        for port in self.ports() {
            self.close(port);
        }
    }

    fn bind(&self, port: u16) -> GatewayResult<tokio::net::TcpListener> {
        let bind_err = |source| GatewayError::Bind { port, source };

        let std_listener = std::net::TcpListener::bind((self.bind_host.as_str(), port)).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
    }
}

impl PortBinder for ListenerRegistry {
    fn open(&self, port: u16) -> GatewayResult<()> {
        if self.servers.contains_key(&port) {
            return Ok(());
        }
        let factory = self
            .factory
            .get()
            .cloned()
            .ok_or_else(|| GatewayError::Config("listener registry has no router".into()))?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(GatewayError::Config("listeners require a tokio runtime".into()));
        }

        let listener = self.bind(port)?;
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind { port, source })?;
        let app = factory(port).into_make_service_with_connect_info::<SocketAddr>();

        let (stop, stopped) = oneshot::channel::<()>();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let signal = async move {
                tokio::select! {
                    _ = stopped => {}
                    _ = shutdown.wait() => {}
                }
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                tracing::error!(port, error = %e, "Listener failed");
            }
            tracing::info!(port, "Listener stopped");
        });

        tracing::info!(port, address = %local_addr, "Listening for connections");
        self.servers.insert(port, Served { local_addr, stop, task });
        Ok(())
    }

    fn close(&self, port: u16) {
        if let Some((_, served)) = self.servers.remove(&port) {
            let _ = served.stop.send(());
            drop(served.task);
            tracing::info!(port, "Listener closing");
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bind_host", &self.bind_host)
            .field("ports", &self.ports())
            .finish()
    }
}
