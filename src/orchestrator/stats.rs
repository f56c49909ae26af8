// src/orchestrator/stats.rs

//! Run statistics
//!
//! Every orchestrator run appends one JSON record to the stats file:
//! counts, wall-clock duration, error messages grouped by their leading
//! three words (with one sample per group) and a histogram of the file
//! extensions appearing in error messages. The file holds a JSON array
//! so downstream tooling can trend runs.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

static PREFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+\s+\S+\s+\S+)").unwrap());

static TRAILING_EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.(\w+)$").unwrap());

/// One appended stats record.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub hostname: String,
    pub run_label: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub errors: usize,
    pub skipped: usize,
    pub already_processed: usize,
    pub objects_injected: usize,
    pub partition_files_injected: usize,
    pub files_injected: usize,
    pub errors_grouped: BTreeMap<String, usize>,
    pub error_samples: BTreeMap<String, String>,
    pub errors_file_type_frequencies: BTreeMap<String, usize>,
}

/// Group error messages by their first three words, keeping one sample
/// message per group.
pub fn group_errors_by_prefix(
    errors: &[String],
) -> (BTreeMap<String, usize>, BTreeMap<String, String>) {
    let mut groups = BTreeMap::new();
    let mut samples = BTreeMap::new();
    for error in errors {
        let prefix = PREFIX_PATTERN
            .captures(error)
            .map(|caps| caps[1].to_string())
            .unwrap_or_else(|| "Unknown Errors".to_string());
        *groups.entry(prefix.clone()).or_insert(0usize) += 1;
        samples.entry(prefix).or_insert_with(|| error.clone());
    }
    (groups, samples)
}

/// Count the file extensions appearing at the end of error messages.
pub fn extension_histogram(errors: &[String]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for error in errors {
        if let Some(caps) = TRAILING_EXTENSION.captures(error) {
            let extension = caps[1].to_lowercase();
            *histogram.entry(extension).or_insert(0usize) += 1;
        }
    }
    histogram
}

/// Append one record to the JSON-array stats file, creating it when
/// absent and resetting it when unreadable.
pub fn append_stats(path: &Path, stats: &RunStats) -> Result<()> {
    let mut records: Vec<serde_json::Value> = match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    records.push(serde_json::to_value(stats).map_err(|e| Error::Config(e.to_string()))?);
    let serialized = serde_json::to_string_pretty(&records)
        .map_err(|e| Error::Config(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, serialized).map_err(|e| Error::io(path, e))?;
    info!("stats record appended to {}", path.display());
    Ok(())
}

pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
