//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from the loaded configuration
//! - Build the gateway and publish its rules (listeners open here)
//! - Start background tasks (node reviver, session purge, config reload)
//! - Wait for shutdown, then stop listeners and background tasks
//!
//! # Design Decisions
//! - Fail fast: an invalid initial rule set or a busy port is fatal
//! - A failed reload is logged; the running rules stay in place
//! - Listeners start last (traffic only when ready)

use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{ConfigWatcher, GatewayConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::http::Gateway;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};

/// How the process was started.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// File the configuration was loaded from, if any.
    pub config_path: Option<PathBuf>,
    /// Reload rules when the file changes.
    pub watch: bool,
}

/// Run the gateway until a termination signal arrives.
pub async fn run(config: GatewayConfig, options: StartupOptions) -> GatewayResult<()> {
    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let gateway = Gateway::new(config.clone(), shutdown.clone());
    let mut tasks = Vec::new();

    if let Some(tracker) = gateway.failure_tracker() {
        let interval = Duration::from_secs(config.health.check_interval_secs);
        tasks.push(tokio::spawn(tracker.clone().run(interval, shutdown.clone())));
    }

    let session_timeout = Duration::from_secs(config.cluster_manager.session_timeout_secs);
    if !session_timeout.is_zero() {
        tasks.push(spawn_session_purge(gateway.clone(), session_timeout, shutdown.clone()));
    }

    let _watcher = match (&options.config_path, options.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let watcher = watcher
                .run()
                .map_err(|e| GatewayError::Config(format!("cannot watch {}: {}", path.display(), e)))?;
            tasks.push(spawn_reloader(gateway.clone(), updates, shutdown.clone()));
            Some(watcher)
        }
        _ => None,
    };

    if let Err(e) = gateway.start() {
        tracing::error!(error = %e, "Failed to start gateway");
        shutdown.trigger();
        return Err(e);
    }

    spawn_signal_handler(shutdown.clone());
    shutdown.wait().await;

    tracing::info!("Shutting down");
    gateway.stop();
    join_all(tasks).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Drop sessions idle for longer than `timeout`.
fn spawn_session_purge(gateway: Arc<Gateway>, timeout: Duration, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval((timeout / 2).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    gateway.clusters().purge_sessions_older_than(timeout);
                }
                _ = shutdown.wait() => break,
            }
        }
    })
}

/// Apply every configuration the watcher emits.
fn spawn_reloader(
    gateway: Arc<Gateway>,
    mut updates: tokio::sync::mpsc::UnboundedReceiver<GatewayConfig>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(config) = update else { break };
                    if let Err(e) = gateway.reload(config) {
                        tracing::error!(error = %e, "Reload rejected, keeping current rules");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn reloader_applies_updates_until_shutdown() {
        let shutdown = Shutdown::new();
        let config: GatewayConfig = toml::from_str("[listener]\nbind_host = \"127.0.0.1\"\n").unwrap();
        let gateway = Gateway::new(config, shutdown.clone());
        gateway.start().unwrap();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task = spawn_reloader(gateway.clone(), rx, shutdown.clone());

        let port = free_port();
        let update: GatewayConfig = toml::from_str(&format!(
            "[listener]\nbind_host = \"127.0.0.1\"\n[[rules]]\nname = \"a\"\nport = {}\n",
            port
        ))
        .unwrap();
        tx.send(update).unwrap();

        for _ in 0..50 {
            if gateway.rules().len() == 1 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.listeners().ports(), vec![port]);

        shutdown.trigger();
        task.await.unwrap();
        gateway.stop();
    }

    #[tokio::test]
    async fn busy_port_fails_startup() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config: GatewayConfig = toml::from_str(&format!(
            "[listener]\nbind_host = \"127.0.0.1\"\n[[rules]]\nname = \"a\"\nport = {}\n",
            port
        ))
        .unwrap();

        let err = run(config, StartupOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Bind { .. }));
    }
}
