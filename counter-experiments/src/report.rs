//! Append-only result log and its aggregation.
//!
//! Each experiment run appends exactly one line: an integer final counter
//! value or a floating-point elapsed-seconds figure. Aggregation reads
//! every line back and reports the mean across runs.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

/// Appends one value as its own line, creating the file on first use.
pub fn append_record(path: &Path, value: impl Display) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{value}")
}

/// Reads every non-empty line as a float. Integer lines (final counter
/// values) parse as floats too, so both log flavors aggregate the same
/// way.
pub fn load_values(path: &Path) -> Result<Vec<f64>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read result log {}", path.display()))?;

    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<f64>()
                .with_context(|| format!("bad result line {line:?} in {}", path.display()))
        })
        .collect()
}

/// Mean of the recorded values; `None` for an empty log.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
