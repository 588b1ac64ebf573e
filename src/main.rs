//! HTTP/SOAP API gateway
//!
//! Routing and dispatch engine built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────────┐
//!                         │                      API GATEWAY                      │
//!                         │                                                      │
//!     Client Request      │  ┌──────────┐   ┌──────────┐   ┌────────────────┐    │
//!     ────────────────────┼─▶│   net    │──▶│   http   │──▶│    routing     │    │
//!                         │  │ listener │   │  server  │   │   RuleTable    │    │
//!                         │  └──────────┘   └──────────┘   └───────┬────────┘    │
//!                         │                                        ▼             │
//!                         │                               ┌────────────────┐     │
//!                         │                               │    pipeline    │     │
//!                         │                               │ rule stages →  │     │
//!                         │                               │ load_balancer →│     │
//!                         │                               │ dispatch       │     │
//!                         │                               └───────┬────────┘     │
//!                         │                                       ▼              │
//!     Client Response     │  ┌──────────┐   ┌──────────┐   ┌────────────────┐    │
//!     ◀───────────────────┼──│ response │◀──│ protocol │◀──│  http client   │◀───┼── Backend
//!                         │  │   pass   │   │ handlers │   │ retry/failover │    │   Node
//!                         │  └──────────┘   └──────────┘   └────────────────┘    │
//!                         │                                                      │
//!                         │  cluster · health · config · observability · lifecycle│
//!                         └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{self, StartupOptions};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "HTTP/SOAP API gateway", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload rules when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    lifecycle::run(
        config,
        StartupOptions {
            config_path: cli.config,
            watch: cli.watch,
        },
    )
    .await?;
    Ok(())
}
