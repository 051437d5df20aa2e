//! Entry point for `pfcp-node`.
//!
//! Parses CLI arguments, sets up logging and runs a heartbeat [`Node`] until
//! Ctrl-C.  All protocol work lives in the library; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing).

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use pfcp_transaction::node::{Node, NodeConfig};
use pfcp_transaction::Config;

/// PFCP node exchanging heartbeats over the reliable transaction layer.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address to bind (e.g. 0.0.0.0:8805).
    #[arg(short, long, default_value = "0.0.0.0:8805")]
    bind: SocketAddr,

    /// Peer to send heartbeats to.  May be repeated.
    #[arg(short, long = "peer")]
    peers: Vec<SocketAddr>,

    /// Retransmission interval for outbound requests, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    retrans_timeout_ms: u64,

    /// Retransmissions before a request is given up.
    #[arg(long, default_value_t = 3)]
    max_retrans: u8,

    /// Seconds between heartbeats to each peer.
    #[arg(long, default_value_t = 10)]
    heartbeat_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    if cli.heartbeat_interval_secs == 0 {
        anyhow::bail!("--heartbeat-interval-secs must be at least 1");
    }

    let config = NodeConfig {
        bind: cli.bind,
        peers: cli.peers,
        heartbeat_interval: Duration::from_secs(cli.heartbeat_interval_secs),
        transaction: Config::new(Duration::from_millis(cli.retrans_timeout_ms), cli.max_retrans),
    };
    log::info!("Starting node on {}", config.bind);

    let node = Node::bind(config).await?;
    node.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("ctrl-c handler: {e}");
        }
    })
    .await
}
