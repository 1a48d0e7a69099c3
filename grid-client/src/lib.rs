//! Client and test collaborator for a small multi-node data grid.
//!
//! The grid exposes two primitives the experiment harnesses rely on: a
//! named key-value map with per-key atomic get/put/compare-and-swap/lock
//! operations, and named bounded queues with blocking put/take. Each
//! module focuses on a concrete responsibility:
//!
//! - [`protocol`] defines the JSON line protocol plus blocking read and
//!   write helpers.
//! - [`node`] is a single-process grid node serving that protocol. It
//!   honors the client contract (linearizable single-key operations,
//!   blocking bounded queues) without pretending to replicate anything,
//!   which makes it a faithful stand-in for experiments and tests.
//! - [`client`] connects to a cluster with a bounded backoff policy and
//!   exposes the map, lock, and queue operations over one session.
//! - [`error`] is the failure taxonomy shared by everything above.
//! - [`colors`] holds ANSI escape helpers for human-readable run output.
//!
//! The counter and queue harness crates use this crate directly; their
//! integration tests spawn a [`node::GridNode`] in-process and drive it
//! over real TCP connections.

pub mod client;
pub mod colors;
pub mod error;
pub mod node;
pub mod protocol;
