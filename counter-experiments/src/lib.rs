//! Counter experiments against the replicated map.
//!
//! A single shared counter is incremented from several isolated worker
//! processes under three competing concurrency-control disciplines, and
//! the outcome is measured. Each module focuses on a concrete
//! responsibility:
//!
//! - [`strategy`] implements the three disciplines (no synchronization,
//!   optimistic compare-and-swap with a retry bound, pessimistic
//!   exclusive locking) behind one entry point.
//! - [`orchestrator`] initializes the counter, spawns the worker
//!   processes, waits for them, and reads the final value.
//! - [`report`] is the append-only result log and its mean aggregation.
//!
//! The binary exposes `run`, `worker`, and `report` subcommands; `worker`
//! is what the orchestrator spawns `W` times against the same key.

pub mod orchestrator;
pub mod report;
pub mod strategy;
