use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use counter_experiments::orchestrator::{self, RecordMode, RunConfig};
use counter_experiments::report;
use counter_experiments::strategy::{
    self, Discipline, ExhaustionPolicy, RetryPolicy, DEFAULT_RETRY_ATTEMPTS,
};
use grid_client::client::{ClusterConfig, ConnectPolicy, GridClient};
use grid_client::colors::{paint, FAIL, HEADER, OKCYAN, OKGREEN};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one experiment: spawn worker processes against the shared
    /// counter and report the outcome.
    Run(RunArgs),
    /// Run a single worker. Spawned by `run`; rarely useful by hand.
    Worker(WorkerArgs),
    /// Aggregate a result log and print the mean.
    Report(ReportArgs),
}

/// Grid session flags shared by `run` and `worker`.
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

    #[arg(long, default_value = "distributed-map")]
    map: String,

    /// The shared counter key.
    #[arg(long, default_value = "0")]
    key: String,

    /// Bounded connect retry: attempts before giving up.
    #[arg(long, default_value_t = 5)]
    connect_attempts: u32,

    /// Bounded connect retry: initial backoff delay (doubles per attempt).
    #[arg(long, default_value_t = 200)]
    connect_delay_ms: u64,
}

impl GridArgs {
    fn cluster(&self) -> ClusterConfig {
        ClusterConfig {
            name: self.cluster_name.clone(),
            members: self.members.clone(),
        }
    }

    fn connect(&self) -> ConnectPolicy {
        ConnectPolicy {
            max_attempts: self.connect_attempts,
            initial_delay: Duration::from_millis(self.connect_delay_ms),
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Number of isolated worker processes.
    #[arg(long, default_value_t = 3)]
    workers: usize,

    /// Increments per worker.
    #[arg(long, default_value_t = 10_000)]
    iterations: u64,

    #[arg(long, value_enum)]
    discipline: Discipline,

    /// Optimistic only: compare-and-swap attempts per increment.
    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    retries: u32,

    /// Optimistic only: what retry exhaustion does.
    #[arg(long, value_enum, default_value_t = ExhaustionPolicy::Drop)]
    on_exhausted: ExhaustionPolicy,

    /// Append one result line per run to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Which figure the result line carries.
    #[arg(long, value_enum, default_value_t = RecordMode::FinalValue)]
    record: RecordMode,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    #[command(flatten)]
    grid: GridArgs,

    #[arg(long, default_value_t = 10_000)]
    iterations: u64,

    #[arg(long, value_enum)]
    discipline: Discipline,

    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    retries: u32,

    #[arg(long, value_enum, default_value_t = ExhaustionPolicy::Drop)]
    on_exhausted: ExhaustionPolicy,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(long)]
    log_file: PathBuf,
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
        Command::Run(args) => run_experiment(args),
        Command::Worker(args) => run_worker(args),
        Command::Report(args) => run_report(args),
    }
}

fn run_experiment(args: RunArgs) -> Result<()> {
    let config = RunConfig {
        worker_program: std::env::current_exe().context("cannot locate own executable")?,
        workers: args.workers,
        iterations: args.iterations,
        discipline: args.discipline,
        retry: RetryPolicy {
            max_attempts: args.retries,
            on_exhausted: args.on_exhausted,
        },
        cluster: args.grid.cluster(),
        connect: args.grid.connect(),
        map: args.grid.map.clone(),
        key: args.grid.key.clone(),
        log_file: args.log_file,
        record: args.record,
    };

    let outcome = orchestrator::run(&config)?;

    println!(
        "\n{}",
        paint(
            HEADER,
            format!(
                "Starting value of key {:?}: {}",
                config.key, outcome.starting_value
            )
        )
    );
    println!(
        "{}",
        paint(
            OKGREEN,
            format!("Final value of key {:?}: {}", config.key, outcome.final_value)
        )
    );
    println!(
        "{}",
        paint(
            OKCYAN,
            format!("Time taken: {:.2} seconds", outcome.elapsed.as_secs_f64())
        )
    );

    if !outcome.succeeded() {
        println!(
            "{}",
            paint(
                FAIL,
                format!(
                    "{} of {} workers failed; results above are diagnostic only",
                    outcome.failed_workers, config.workers
                )
            )
        );
        bail!("{} worker process(es) exited with failure", outcome.failed_workers);
    }
    Ok(())
}

fn run_worker(args: WorkerArgs) -> Result<()> {
    let mut client = GridClient::connect(&args.grid.cluster(), &args.grid.connect())
        .context("worker failed to reach the grid")?;

    let retry = RetryPolicy {
        max_attempts: args.retries,
        on_exhausted: args.on_exhausted,
    };
    let report = strategy::run_increments(
        &mut client,
        &args.grid.map,
        &args.grid.key,
        args.iterations,
        args.discipline,
        &retry,
    )?;

    info!(
        applied = report.applied,
        dropped = report.dropped,
        discipline = ?args.discipline,
        "worker finished"
    );
    Ok(())
}

fn run_report(args: ReportArgs) -> Result<()> {
    let values = report::load_values(&args.log_file)?;
    match report::mean(&values) {
        Some(mean) => {
            println!("Average recorded value over {} run(s): {:.2}", values.len(), mean);
            Ok(())
        }
        None => bail!("result log {} is empty", args.log_file.display()),
    }
}
