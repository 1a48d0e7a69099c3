//! Multi-process experiment orchestration.
//!
//! The orchestrator zeroes the shared counter, launches `W` isolated
//! worker processes that each open their own grid session and run one
//! discipline against the same key, waits for all of them, and reads the
//! final value back. Process-level isolation is the point: the workers
//! share nothing but the grid, faithfully modeling independent clients.

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::json;
use tracing::{info, warn};

use grid_client::client::{ClusterConfig, ConnectPolicy, GridClient};

use crate::report;
use crate::strategy::{Discipline, ExhaustionPolicy, RetryPolicy};

/// Which figure a run appends to the result log: the counter's final
/// value (the lost-update demonstration) or the run's wall-clock seconds
/// (the timing comparison).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    FinalValue,
    Elapsed,
}

/// Everything one experiment run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Binary to spawn for each worker; invoked with the `worker`
    /// subcommand. The CLI passes its own executable here, tests pass the
    /// built binary path.
    pub worker_program: PathBuf,
    pub workers: usize,
    pub iterations: u64,
    pub discipline: Discipline,
    pub retry: RetryPolicy,
    pub cluster: ClusterConfig,
    pub connect: ConnectPolicy,
    pub map: String,
    pub key: String,
    /// Append-only result log, one value per line. `None` skips logging.
    pub log_file: Option<PathBuf>,
    pub record: RecordMode,
}

/// What a run produced, failed workers included.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub starting_value: u64,
    pub final_value: u64,
    pub elapsed: Duration,
    /// Workers that exited with a non-zero status. A non-empty count
    /// marks the run as failed, but the final value above was still read
    /// for diagnostics.
    pub failed_workers: usize,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_workers == 0
    }
}

/// Runs one experiment: init counter, spawn workers, join, read back.
pub fn run(config: &RunConfig) -> Result<RunOutcome> {
    let mut client = GridClient::connect(&config.cluster, &config.connect)
        .context("orchestrator failed to reach the grid")?;

    client.put(&config.map, &config.key, json!(0))?;
    let starting_value = read_counter(&mut client, config)?;
    info!(
        starting_value,
        key = %config.key,
        workers = config.workers,
        iterations = config.iterations,
        discipline = ?config.discipline,
        "counter initialized, spawning workers"
    );

    let args = worker_args(config);
    let start = Instant::now();

    let mut children = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let child = Command::new(&config.worker_program)
            .args(&args)
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn worker {worker} via {}",
                    config.worker_program.display()
                )
            })?;
        children.push(child);
    }

    let mut failed_workers = 0;
    for (worker, mut child) in children.into_iter().enumerate() {
        let status = child
            .wait()
            .with_context(|| format!("failed to wait for worker {worker}"))?;
        if !status.success() {
            warn!(worker, %status, "worker exited with failure");
            failed_workers += 1;
        }
    }

    let elapsed = start.elapsed();

    // Failed or not, the run reports whatever the counter ended up at.
    let final_value = read_counter(&mut client, config)?;
    info!(final_value, ?elapsed, failed_workers, "run complete");

    if let Some(path) = &config.log_file {
        match config.record {
            RecordMode::FinalValue => report::append_record(path, final_value),
            RecordMode::Elapsed => report::append_record(path, elapsed.as_secs_f64()),
        }
        .with_context(|| format!("failed to append result to {}", path.display()))?;
    }

    Ok(RunOutcome {
        starting_value,
        final_value,
        elapsed,
        failed_workers,
    })
}

fn read_counter(client: &mut GridClient, config: &RunConfig) -> Result<u64> {
    Ok(client
        .get(&config.map, &config.key)?
        .and_then(|v| v.as_u64())
        .unwrap_or(0))
}

/// Command line handed to every worker process. Workers get the full
/// cluster and retry configuration; their only private state is their own
/// grid session.
fn worker_args(config: &RunConfig) -> Vec<String> {
    let mut args = vec!["worker".to_string()];
    args.extend(["--cluster-name".to_string(), config.cluster.name.clone()]);
    for member in &config.cluster.members {
        args.extend(["--member".to_string(), member.clone()]);
    }
    args.extend([
        "--map".to_string(),
        config.map.clone(),
        "--key".to_string(),
        config.key.clone(),
        "--iterations".to_string(),
        config.iterations.to_string(),
        "--discipline".to_string(),
        discipline_flag(config.discipline).to_string(),
        "--retries".to_string(),
        config.retry.max_attempts.to_string(),
        "--on-exhausted".to_string(),
        exhaustion_flag(config.retry.on_exhausted).to_string(),
        "--connect-attempts".to_string(),
        config.connect.max_attempts.to_string(),
        "--connect-delay-ms".to_string(),
        config.connect.initial_delay.as_millis().to_string(),
    ]);
    args
}

fn discipline_flag(discipline: Discipline) -> &'static str {
    match discipline {
        Discipline::NoSync => "no-sync",
        Discipline::Optimistic => "optimistic",
        Discipline::Pessimistic => "pessimistic",
    }
}

fn exhaustion_flag(policy: ExhaustionPolicy) -> &'static str {
    match policy {
        ExhaustionPolicy::Drop => "drop",
        ExhaustionPolicy::Fatal => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_args_cover_every_knob() {
        let config = RunConfig {
            worker_program: PathBuf::from("counter-experiments"),
            workers: 3,
            iterations: 10_000,
            discipline: Discipline::Optimistic,
            retry: RetryPolicy::default(),
            cluster: ClusterConfig {
                name: "dev".to_string(),
                members: vec!["127.0.0.1:5701".to_string(), "127.0.0.1:5702".to_string()],
            },
            connect: ConnectPolicy::default(),
            map: "distributed-map".to_string(),
            key: "0".to_string(),
            log_file: None,
            record: RecordMode::FinalValue,
        };

        let args = worker_args(&config);
        assert_eq!(args[0], "worker");
        assert_eq!(args.iter().filter(|a| *a == "--member").count(), 2);
        for flag in [
            "--cluster-name",
            "--map",
            "--key",
            "--iterations",
            "--discipline",
            "--retries",
            "--on-exhausted",
            "--connect-attempts",
            "--connect-delay-ms",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(args.contains(&"optimistic".to_string()));
        assert!(args.contains(&"drop".to_string()));
    }
}
