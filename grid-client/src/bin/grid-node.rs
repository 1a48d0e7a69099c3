//! Standalone grid node.
//!
//! Run one per cluster member address, e.g.:
//!
//! ```text
//! grid-node --listen 127.0.0.1:5701
//! grid-node --listen 127.0.0.1:5702
//! grid-node --listen 127.0.0.1:5703
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::info;

use grid_client::node::{GridNode, NodeConfig, DEFAULT_QUEUE_CAPACITY};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5701")]
    listen: String,

    /// Cluster name clients must present in their handshake.
    #[arg(long, default_value = "dev")]
    cluster_name: String,

    /// Capacity of every named queue on this node.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let node = GridNode::bind(NodeConfig {
        listen: cli.listen,
        cluster: cli.cluster_name,
        queue_capacity: cli.queue_capacity,
    })?;

    info!(addr = %node.local_addr(), "serving until interrupted");
    node.join()
}
