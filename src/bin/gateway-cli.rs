use clap::{Parser, Subcommand};
use std::time::{SystemTime, UNIX_EPOCH};

use api_gateway::cluster::EncryptedPayloadDecoder;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Announce cluster nodes to the API gateway", long_about = None)]
struct Cli {
    /// Base URL of a rule serving the cluster notification endpoint.
    #[arg(short, long, default_value = "http://localhost:9010")]
    url: String,

    /// Cluster name.
    #[arg(short, long, default_value = "Default")]
    cluster: String,

    /// Shared secret; when set the query is sent encrypted as `data=`.
    #[arg(short, long)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node or mark it available again
    Up { host: String, port: u16 },
    /// Mark a node unavailable
    Down { host: String, port: u16 },
    /// Remove a node from the cluster
    Takeout { host: String, port: u16 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (operation, host, port) = match &cli.command {
        Commands::Up { host, port } => ("up", host, *port),
        Commands::Down { host, port } => ("down", host, *port),
        Commands::Takeout { host, port } => ("takeout", host, *port),
    };

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query
        .append_pair("host", host)
        .append_pair("port", &port.to_string())
        .append_pair("cluster", &cli.cluster);

    let query = match &cli.secret {
        Some(secret) => {
            let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
            query.append_pair("time", &millis.to_string());
            let payload = EncryptedPayloadDecoder::new(secret.as_str()).encode(&query.finish())?;
            format!("data={}", payload)
        }
        None => query.finish(),
    };

    let url = format!(
        "{}/clustermanager/{}?{}",
        cli.url.trim_end_matches('/'),
        operation,
        query
    );
    let res = reqwest::Client::new().get(&url).send().await?;

    let status = res.status();
    if status.is_success() {
        println!("{} {}:{} in cluster {}: {}", operation, host, port, cli.cluster, status);
    } else {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    Ok(())
}
