#![forbid(unsafe_code)]
//! HashLedger node: HTTP API, periodic miner and peer broadcaster in one process.

use clap::Parser;
use hashledger::config::{load_config, load_peers};
use hashledger::node::Node;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// API port, overriding `network.api_port`
    #[arg(long)]
    port: Option<u16>,

    /// Peer list file, overriding `network.peers_file`
    #[arg(long)]
    peers: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. `info`, `hashledger=debug`)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.port {
        config.network.api_port = port;
    }
    let peers_file = cli.peers.unwrap_or_else(|| PathBuf::from(&config.network.peers_file));
    let peers = load_peers(&peers_file)?;

    let node = Arc::new(Node::new(config, peers)?);
    node.run().await?;
    Ok(())
}
