//! ANSI escape codes for human-readable run summaries.
//!
//! Structured logging goes through `tracing`; these are only for the
//! final summary lines the harness binaries print for a human at a
//! terminal.

pub const HEADER: &str = "\x1b[95m";
pub const OKBLUE: &str = "\x1b[94m";
pub const OKCYAN: &str = "\x1b[96m";
pub const OKGREEN: &str = "\x1b[92m";
pub const WARNING: &str = "\x1b[93m";
pub const FAIL: &str = "\x1b[91m";
pub const BOLD: &str = "\x1b[1m";
pub const ENDC: &str = "\x1b[0m";

/// Wraps `text` in the given escape code and a trailing reset.
pub fn paint(code: &str, text: impl std::fmt::Display) -> String {
    format!("{code}{text}{ENDC}")
}
