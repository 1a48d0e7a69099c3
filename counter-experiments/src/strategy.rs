//! The three counter mutation disciplines.
//!
//! All three repeatedly transform one shared counter key through the same
//! entry point, [`run_increments`]; they differ only in how (and whether)
//! they defend the read-modify-write window against other workers:
//!
//! - [`Discipline::NoSync`] — plain get-then-put, the deliberate negative
//!   control. Concurrent workers lose updates.
//! - [`Discipline::Optimistic`] — read, compute, compare-and-swap; on a
//!   lost race, re-read and retry up to the configured bound.
//! - [`Discipline::Pessimistic`] — exclusive lock around the
//!   read-modify-write, so no interleaving can lose an update.

use clap::ValueEnum;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use grid_client::client::GridClient;
use grid_client::error::StoreError;

/// Retry bound the reference runs use for the optimistic discipline.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 50;

/// Which concurrency-control discipline a worker runs.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    NoSync,
    Optimistic,
    Pessimistic,
}

/// What the optimistic discipline does once its retry bound is spent.
///
/// `Drop` is the reference behavior: the increment is skipped, counted in
/// [`IncrementReport::dropped`], and logged — a deliberate undercount,
/// never a silent one. `Fatal` turns exhaustion into
/// [`StrategyError::RetryExhausted`] instead.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    Drop,
    Fatal,
}

/// Retry bound and exhaustion policy for the optimistic discipline.
/// Ignored by the other two.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            on_exhausted: ExhaustionPolicy::Drop,
        }
    }
}

/// Errors a strategy run can end with.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Optimistic only: one increment burned through the whole retry
    /// bound under the `Fatal` policy.
    #[error("compare-and-swap retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

/// What one worker actually did to the counter.
///
/// For the optimistic discipline, every applied increment was a winning
/// compare-and-swap, so the final counter value always equals the sum of
/// `applied` across workers; `dropped` counts increments abandoned after
/// retry exhaustion under [`ExhaustionPolicy::Drop`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IncrementReport {
    pub applied: u64,
    pub dropped: u64,
}

/// Performs `iterations` increments of `key` under the chosen discipline,
/// using the caller's own grid session.
pub fn run_increments(
    client: &mut GridClient,
    map: &str,
    key: &str,
    iterations: u64,
    discipline: Discipline,
    retry: &RetryPolicy,
) -> Result<IncrementReport, StrategyError> {
    match discipline {
        Discipline::NoSync => no_sync(client, map, key, iterations),
        Discipline::Optimistic => optimistic(client, map, key, iterations, retry),
        Discipline::Pessimistic => pessimistic(client, map, key, iterations),
    }
}

/// Unprotected read-modify-write. Nothing ties the get to the put, so a
/// concurrent worker writing between the two erases this worker's
/// increment.
fn no_sync(
    client: &mut GridClient,
    map: &str,
    key: &str,
    iterations: u64,
) -> Result<IncrementReport, StrategyError> {
    let mut report = IncrementReport::default();
    for _ in 0..iterations {
        let current = counter_value(client.get(map, key)?);
        client.put(map, key, json!(current + 1))?;
        report.applied += 1;
    }
    Ok(report)
}

/// Read the current value, then swap in `current + 1` only if the value
/// is still exactly what was read. A lost race re-reads and retries,
/// never blindly overwrites.
fn optimistic(
    client: &mut GridClient,
    map: &str,
    key: &str,
    iterations: u64,
    retry: &RetryPolicy,
) -> Result<IncrementReport, StrategyError> {
    let mut report = IncrementReport::default();
    'increments: for _ in 0..iterations {
        for _ in 0..retry.max_attempts {
            let current = client.get(map, key)?;
            let next = counter_value(current.clone()) + 1;
            if client.compare_and_swap(map, key, current, json!(next))? {
                report.applied += 1;
                continue 'increments;
            }
        }

        match retry.on_exhausted {
            ExhaustionPolicy::Drop => {
                report.dropped += 1;
                warn!(
                    attempts = retry.max_attempts,
                    key, "increment dropped after retry exhaustion"
                );
            }
            ExhaustionPolicy::Fatal => {
                return Err(StrategyError::RetryExhausted {
                    attempts: retry.max_attempts,
                });
            }
        }
    }
    Ok(report)
}

/// Exclusive lock around the read-modify-write. The lock is released on
/// every exit path of the critical section; only the holder may
/// read-then-write, so no interleaving loses updates.
fn pessimistic(
    client: &mut GridClient,
    map: &str,
    key: &str,
    iterations: u64,
) -> Result<IncrementReport, StrategyError> {
    let mut report = IncrementReport::default();
    for _ in 0..iterations {
        client.with_lock(map, key, |session| -> Result<(), StrategyError> {
            let current = counter_value(session.get(map, key)?);
            session.put(map, key, json!(current + 1))?;
            Ok(())
        })?;
        report.applied += 1;
    }
    Ok(report)
}

/// An absent or non-numeric counter reads as 0, matching the reference
/// `get(key) or 0` behavior.
fn counter_value(value: Option<Value>) -> u64 {
    value.and_then(|v| v.as_u64()).unwrap_or(0)
}
