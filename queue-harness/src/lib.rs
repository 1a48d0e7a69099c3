//! Bounded replicated queue harness.
//!
//! Drives a named bounded queue on the grid with a blocking
//! producer/consumer protocol. The producer enqueues a numbered run of
//! items and then one poison-pill sentinel per consumer; each consumer
//! block-polls the queue until it observes a sentinel. A second,
//! single-threaded variant fills the queue and then drains it
//! sequentially to show that a bounded `put` blocks rather than losing
//! items and that end-to-end order is preserved.
//!
//! All protocol logic lives in [`harness`]; the binary only parses flags
//! and prints a summary.

pub mod harness;
