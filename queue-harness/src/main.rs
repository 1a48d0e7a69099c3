use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use grid_client::client::{ClusterConfig, ConnectPolicy};
use grid_client::colors::{paint, BOLD, OKCYAN, OKGREEN};
use queue_harness::harness::{self, HarnessConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One producer and concurrent consumers, terminated by sentinels.
    Run(RunArgs),
    /// Fill the queue, then drain it sequentially from a single reader.
    Drain(DrainArgs),
}

#[derive(Args, Debug, Clone)]
struct GridArgs {
    /// Cluster member address; repeat for each member.
    #[arg(
        long = "member",
        default_values_t = [
            "127.0.0.1:5701".to_string(),
            "127.0.0.1:5702".to_string(),
            "127.0.0.1:5703".to_string(),
        ]
    )]
    members: Vec<String>,

    #[arg(long, default_value = "dev")]
    cluster_name: String,

    #[arg(long, default_value = "queue")]
    queue: String,

    /// Bounded connect retry: attempts before giving up.
    #[arg(long, default_value_t = 5)]
    connect_attempts: u32,

    /// Bounded connect retry: initial backoff delay (doubles per attempt).
    #[arg(long, default_value_t = 200)]
    connect_delay_ms: u64,

    /// Consumer wait after an empty size snapshot, in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_wait_ms: u64,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Items to produce (enqueued as 1..=items).
    #[arg(long, default_value_t = 100)]
    items: u64,

    /// Concurrent consumers (and sentinels enqueued).
    #[arg(long, default_value_t = 2)]
    consumers: usize,
}

#[derive(Args, Debug)]
struct DrainArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Items to produce before draining. Must fit the node's queue
    /// capacity together with the sentinel.
    #[arg(long, default_value_t = 14)]
    items: u64,
}

impl GridArgs {
    fn harness_config(&self, items: u64, consumers: usize) -> HarnessConfig {
        HarnessConfig {
            cluster: ClusterConfig {
                name: self.cluster_name.clone(),
                members: self.members.clone(),
            },
            connect: ConnectPolicy {
                max_attempts: self.connect_attempts,
                initial_delay: Duration::from_millis(self.connect_delay_ms),
            },
            queue: self.queue.clone(),
            items,
            consumers,
            poll_wait: Duration::from_millis(self.poll_wait_ms),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => {
            let config = args.grid.harness_config(args.items, args.consumers);
            let report = harness::run_producer_consumers(&config)?;

            println!(
                "\n{}",
                paint(OKCYAN, format!("Consumer count: {}.", report.total()))
            );
            for (id, received) in report.per_consumer.iter().enumerate() {
                println!("Consumer {id} received {} item(s).", received.len());
            }
            println!(
                "{}",
                paint(OKGREEN, "All consumers observed the sentinel.")
            );
        }
        Command::Drain(args) => {
            let config = args.grid.harness_config(args.items, 1);
            let drained = harness::run_drain(&config)?;

            println!("\n{}", paint(BOLD, format!("Drained {} item(s)", drained.len())));
            println!("Values:");
            for item in &drained {
                println!("{item}");
            }
            println!("{}", paint(OKGREEN, "Queue drained in production order."));
        }
    }

    Ok(())
}
