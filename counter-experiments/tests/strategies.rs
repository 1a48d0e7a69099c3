//! Integration tests for the counter disciplines and the orchestrator.
//!
//! Strategy tests run workers as threads, each with its own grid session,
//! against an in-process node; the orchestrator tests spawn the real CLI
//! binary as isolated worker processes.

use std::fs;
use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Result};
use nanoid::nanoid;
use serde_json::json;

use counter_experiments::orchestrator::{self, RecordMode, RunConfig};
use counter_experiments::strategy::{
    run_increments, Discipline, ExhaustionPolicy, IncrementReport, RetryPolicy, StrategyError,
};
use grid_client::client::{ClusterConfig, ConnectPolicy, GridClient};
use grid_client::node::{GridNode, NodeConfig};

const MAP: &str = "distributed-map";
const KEY: &str = "0";

fn spawn_cluster() -> Result<ClusterConfig> {
    let node = GridNode::bind(NodeConfig {
        listen: "127.0.0.1:0".to_string(),
        ..NodeConfig::default()
    })?;
    Ok(ClusterConfig {
        name: "dev".to_string(),
        members: vec![node.local_addr().to_string()],
    })
}

fn connect(cluster: &ClusterConfig) -> Result<GridClient> {
    Ok(GridClient::connect(cluster, &ConnectPolicy::default())?)
}

fn reset_counter(cluster: &ClusterConfig) -> Result<()> {
    connect(cluster)?.put(MAP, KEY, json!(0))?;
    Ok(())
}

fn read_counter(cluster: &ClusterConfig) -> Result<u64> {
    Ok(connect(cluster)?
        .get(MAP, KEY)?
        .and_then(|v| v.as_u64())
        .unwrap_or(0))
}

/// Runs `workers` concurrent threads, each performing `iterations`
/// increments over its own grid session, and returns their per-worker
/// outcomes.
fn run_workers(
    cluster: &ClusterConfig,
    workers: usize,
    iterations: u64,
    discipline: Discipline,
    retry: &RetryPolicy,
) -> Result<Vec<Result<IncrementReport, StrategyError>>> {
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let cluster = cluster.clone();
            let retry = retry.clone();
            thread::Builder::new()
                .name(format!("counter-worker-{worker}"))
                .spawn(move || -> Result<IncrementReport, StrategyError> {
                    let mut client = GridClient::connect(&cluster, &ConnectPolicy::default())?;
                    run_increments(&mut client, MAP, KEY, iterations, discipline, &retry)
                })
                .expect("failed to spawn worker thread")
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().map_err(|_| anyhow!("worker thread panicked")))
        .collect()
}

#[test]
fn pessimistic_counts_every_increment() -> Result<()> {
    let cluster = spawn_cluster()?;
    let (workers, iterations) = (4, 200);

    // Deterministic: every trial must land exactly on W x I.
    for _trial in 0..2 {
        reset_counter(&cluster)?;
        let outcomes = run_workers(
            &cluster,
            workers,
            iterations,
            Discipline::Pessimistic,
            &RetryPolicy::default(),
        )?;
        for outcome in outcomes {
            let report = outcome?;
            assert_eq!(report.applied, iterations);
            assert_eq!(report.dropped, 0);
        }
        assert_eq!(read_counter(&cluster)?, workers as u64 * iterations);
    }
    Ok(())
}

#[test]
fn optimistic_with_generous_retry_is_exact() -> Result<()> {
    let cluster = spawn_cluster()?;
    let (workers, iterations) = (4, 150);
    reset_counter(&cluster)?;

    let retry = RetryPolicy {
        max_attempts: 1000,
        on_exhausted: ExhaustionPolicy::Drop,
    };
    let outcomes = run_workers(&cluster, workers, iterations, Discipline::Optimistic, &retry)?;

    let mut applied_total = 0;
    for outcome in outcomes {
        let report = outcome?;
        assert_eq!(report.dropped, 0, "generous retry bound must not exhaust");
        applied_total += report.applied;
    }

    assert_eq!(applied_total, workers as u64 * iterations);
    assert_eq!(read_counter(&cluster)?, workers as u64 * iterations);
    Ok(())
}

#[test]
fn optimistic_with_tiny_retry_undercounts_loudly() -> Result<()> {
    let cluster = spawn_cluster()?;
    let (workers, iterations) = (4, 200);
    let retry = RetryPolicy {
        max_attempts: 1,
        on_exhausted: ExhaustionPolicy::Drop,
    };

    let mut saw_drops = false;
    for _trial in 0..10 {
        reset_counter(&cluster)?;
        let outcomes = run_workers(&cluster, workers, iterations, Discipline::Optimistic, &retry)?;

        let mut applied_total = 0;
        let mut dropped_total = 0;
        for outcome in outcomes {
            let report = outcome?;
            applied_total += report.applied;
            dropped_total += report.dropped;
            assert_eq!(report.applied + report.dropped, iterations);
        }

        // CAS never loses an applied increment, even when it drops some.
        let final_value = read_counter(&cluster)?;
        assert_eq!(final_value, applied_total);
        assert!(final_value <= workers as u64 * iterations);

        if dropped_total > 0 {
            assert!(final_value < workers as u64 * iterations);
            saw_drops = true;
            break;
        }
    }

    assert!(
        saw_drops,
        "a single-attempt retry bound under contention never exhausted in 10 trials"
    );
    Ok(())
}

#[test]
fn optimistic_fatal_policy_surfaces_exhaustion() -> Result<()> {
    let cluster = spawn_cluster()?;
    reset_counter(&cluster)?;

    // A zero-attempt bound exhausts on the first increment, making the
    // fatal path deterministic.
    let retry = RetryPolicy {
        max_attempts: 0,
        on_exhausted: ExhaustionPolicy::Fatal,
    };
    let outcomes = run_workers(&cluster, 2, 5, Discipline::Optimistic, &retry)?;

    for outcome in outcomes {
        match outcome {
            Err(StrategyError::RetryExhausted { attempts: 0 }) => {}
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }
    assert_eq!(read_counter(&cluster)?, 0);
    Ok(())
}

#[test]
fn no_sync_loses_updates_under_contention() -> Result<()> {
    let cluster = spawn_cluster()?;
    let (workers, iterations) = (4, 300);

    let mut saw_loss = false;
    for _trial in 0..10 {
        reset_counter(&cluster)?;
        let outcomes = run_workers(
            &cluster,
            workers,
            iterations,
            Discipline::NoSync,
            &RetryPolicy::default(),
        )?;
        for outcome in outcomes {
            outcome?;
        }

        let final_value = read_counter(&cluster)?;
        assert!(
            final_value <= workers as u64 * iterations,
            "counter can never exceed the attempted increments"
        );
        if final_value < workers as u64 * iterations {
            saw_loss = true;
            break;
        }
    }

    assert!(
        saw_loss,
        "unsynchronized read-modify-write never lost an update in 10 trials"
    );
    Ok(())
}

fn scratch_log() -> PathBuf {
    std::env::temp_dir().join(format!("orchestrator-log-{}.txt", nanoid!()))
}

fn run_config(cluster: ClusterConfig, log_file: PathBuf) -> RunConfig {
    RunConfig {
        worker_program: PathBuf::from(env!("CARGO_BIN_EXE_counter-experiments")),
        workers: 3,
        iterations: 100,
        discipline: Discipline::Pessimistic,
        retry: RetryPolicy::default(),
        cluster,
        connect: ConnectPolicy::default(),
        map: MAP.to_string(),
        key: KEY.to_string(),
        log_file: Some(log_file),
        record: RecordMode::FinalValue,
    }
}

#[test]
fn orchestrator_runs_isolated_worker_processes() -> Result<()> {
    let cluster = spawn_cluster()?;
    let log = scratch_log();

    let outcome = orchestrator::run(&run_config(cluster, log.clone()))?;

    assert_eq!(outcome.starting_value, 0);
    assert_eq!(outcome.final_value, 300);
    assert_eq!(outcome.failed_workers, 0);
    assert!(outcome.succeeded());

    let logged = fs::read_to_string(&log)?;
    assert_eq!(logged.trim(), "300");

    fs::remove_file(&log)?;
    Ok(())
}

#[test]
fn orchestrator_reports_failed_workers_but_still_reads_the_counter() -> Result<()> {
    let cluster = spawn_cluster()?;
    let log = scratch_log();

    let mut config = run_config(cluster, log.clone());
    config.workers = 2;
    config.iterations = 10;
    config.discipline = Discipline::Optimistic;
    // Zero attempts under Fatal makes every worker exit non-zero
    // deterministically, before touching the counter.
    config.retry = RetryPolicy {
        max_attempts: 0,
        on_exhausted: ExhaustionPolicy::Fatal,
    };

    let outcome = orchestrator::run(&config)?;

    assert_eq!(outcome.failed_workers, 2);
    assert!(!outcome.succeeded());
    // Diagnostics still flow: the final value was read and logged.
    assert_eq!(outcome.final_value, 0);
    let logged = fs::read_to_string(&log)?;
    assert_eq!(logged.trim(), "0");

    fs::remove_file(&log)?;
    Ok(())
}
