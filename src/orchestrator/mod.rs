// src/orchestrator/mod.rs

//! Concurrent partition processing
//!
//! The orchestrator walks each partition directory of the supplied tree,
//! enumerates every artifact up front (depth-first, symlinks not
//! followed, bookkeeping files excluded), and dispatches one task per
//! unique path onto a worker pool. Partitions run sequentially; files
//! within a partition run concurrently.
//!
//! Three layers keep a file from being processed twice: a mutex-guarded
//! in-flight set (claims within this process), a per-artifact advisory
//! lock (claims across processes), and the completion marker (claims
//! across runs). The marker is written whether the attempt succeeded or
//! failed — a deliberate at-most-once policy so crashed runs resume
//! without repeating terminal failures.
//!
//! A worker that panics is caught and converted into a per-file error;
//! sibling workers keep running. Only configuration-integrity errors
//! abort a run.

pub mod marker;
pub mod stats;

use crate::config::{BuildPaths, Partition, PreRules, RuleSet};
use crate::error::{Error, Result};
use crate::hash::sha256_file;
use crate::inject::{DirectRecord, IndirectRecord, InjectionEngine, Outcome};
use crate::tools::Toolchain;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Results of one partition pass.
#[derive(Debug, Default)]
pub struct PartitionReport {
    pub partition: String,
    pub direct: Vec<DirectRecord>,
    pub indirect: Vec<IndirectRecord>,
    pub errors: Vec<String>,
    pub skipped: usize,
    pub already_processed: usize,
}

/// Aggregated results of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub partitions: Vec<PartitionReport>,
}

impl RunReport {
    pub fn direct_count(&self) -> usize {
        self.partitions.iter().map(|p| p.direct.len()).sum()
    }

    pub fn indirect_count(&self) -> usize {
        self.partitions.iter().map(|p| p.indirect.len()).sum()
    }

    pub fn error_count(&self) -> usize {
        self.partitions.iter().map(|p| p.errors.len()).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.partitions.iter().map(|p| p.skipped).sum()
    }

    pub fn already_processed_count(&self) -> usize {
        self.partitions.iter().map(|p| p.already_processed).sum()
    }

    pub fn all_errors(&self) -> Vec<String> {
        self.partitions
            .iter()
            .flat_map(|p| p.errors.iter().cloned())
            .collect()
    }
}

pub struct Orchestrator<'a> {
    rules: &'a RuleSet,
    pre: &'a PreRules,
    paths: &'a BuildPaths,
    tools: &'a Toolchain,
    source_root: PathBuf,
    stats_path: Option<PathBuf>,
    run_label: String,
    /// Remove locks/markers after each completed partition. Off by
    /// default so a repeated run sees every file already marked.
    cleanup_after_partition: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        rules: &'a RuleSet,
        pre: &'a PreRules,
        paths: &'a BuildPaths,
        tools: &'a Toolchain,
        source_root: &Path,
    ) -> Self {
        Self {
            rules,
            pre,
            paths,
            tools,
            source_root: source_root.to_path_buf(),
            stats_path: None,
            run_label: "post-build-graft".to_string(),
            cleanup_after_partition: false,
        }
    }

    pub fn with_stats_path(mut self, path: &Path) -> Self {
        self.stats_path = Some(path.to_path_buf());
        self
    }

    pub fn with_run_label(mut self, label: &str) -> Self {
        self.run_label = label.to_string();
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_after_partition = cleanup;
        self
    }

    /// Process every partition directory under the source root.
    ///
    /// Per-file failures are aggregated in the report; only unusable
    /// inputs (missing/empty source tree) return `Err`.
    pub fn run(&self) -> Result<RunReport> {
        if !self.source_root.is_dir() {
            return Err(Error::Config(format!(
                "supplied source tree does not exist: {}",
                self.source_root.display()
            )));
        }
        let partition_dirs = self.partition_dirs()?;
        if partition_dirs.is_empty() {
            return Err(Error::Config(format!(
                "supplied source tree is empty: {}",
                self.source_root.display()
            )));
        }

        if !self.rules.enable_injection {
            info!("injection disabled by configuration, nothing to do");
            return Ok(RunReport::default());
        }

        let started_at = Utc::now();
        let mut report = RunReport::default();
        for (partition, dir) in partition_dirs {
            report
                .partitions
                .push(self.process_partition(partition, &dir)?);
        }
        let finished_at = Utc::now();

        self.prune_duplicate_permissions();
        self.log_summary(&report);

        if let Some(stats_path) = &self.stats_path {
            let errors = report.all_errors();
            let (errors_grouped, error_samples) = stats::group_errors_by_prefix(&errors);
            let record = stats::RunStats {
                hostname: stats::hostname(),
                run_label: self.run_label.clone(),
                started_at,
                finished_at,
                duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
                errors: report.error_count(),
                skipped: report.skipped_count(),
                already_processed: report.already_processed_count(),
                objects_injected: report.indirect_count(),
                partition_files_injected: report.direct_count(),
                files_injected: report.indirect_count() + report.direct_count(),
                errors_grouped,
                error_samples,
                errors_file_type_frequencies: stats::extension_histogram(&errors),
            };
            stats::append_stats(stats_path, &record)?;
        }

        Ok(report)
    }

    /// Partition subdirectories of the source root, in name order.
    fn partition_dirs(&self) -> Result<Vec<(Partition, PathBuf)>> {
        let mut dirs = Vec::new();
        let entries =
            fs::read_dir(&self.source_root).map_err(|e| Error::io(&self.source_root, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match Partition::from_str(&name) {
                Ok(partition) => dirs.push((partition, path)),
                Err(_) => warn!("ignoring non-partition directory: {}", path.display()),
            }
        }
        dirs.sort_by_key(|(_, path)| path.clone());
        Ok(dirs)
    }

    fn process_partition(&self, partition: Partition, dir: &Path) -> Result<PartitionReport> {
        let files = enumerate_artifacts(dir);
        info!(
            "processing partition {} ({} files)",
            partition,
            files.len()
        );

        let progress = ProgressBar::new(files.len() as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{prefix} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_prefix(partition.to_string());

        let engine = InjectionEngine::new(self.rules, self.pre, self.paths, self.tools);
        let in_flight: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
        let outcomes: Mutex<Vec<Outcome>> = Mutex::new(Vec::new());
        let already_processed = Mutex::new(0usize);
        let fatal: Mutex<Option<String>> = Mutex::new(None);

        files.par_iter().for_each(|path| {
            if fatal.lock().expect("fatal slot poisoned").is_some() {
                progress.inc(1);
                return;
            }
            // Claim the path; enumeration deduplicates, so a second
            // claim only happens if the same path slipped in twice.
            {
                let mut claimed = in_flight.lock().expect("in-flight set poisoned");
                if !claimed.insert(path.clone()) {
                    debug!("duplicate submission suppressed: {}", path.display());
                    progress.inc(1);
                    return;
                }
            }

            match self.process_one(&engine, path, partition) {
                Some(Outcome::Fatal { message, .. }) => {
                    fatal
                        .lock()
                        .expect("fatal slot poisoned")
                        .get_or_insert(message);
                }
                Some(outcome) => outcomes.lock().expect("outcome list poisoned").push(outcome),
                None => {
                    *already_processed.lock().expect("counter poisoned") += 1;
                }
            }
            progress.inc(1);
        });
        progress.finish_and_clear();

        if let Some(message) = fatal.into_inner().expect("fatal slot poisoned") {
            return Err(Error::Config(message));
        }

        let mut report = PartitionReport {
            partition: partition.to_string(),
            already_processed: *already_processed.lock().expect("counter poisoned"),
            ..Default::default()
        };
        for outcome in outcomes.into_inner().expect("outcome list poisoned") {
            match outcome {
                Outcome::Direct(record) => report.direct.push(record),
                Outcome::Indirect(record) => report.indirect.push(record),
                Outcome::Skipped { path, reason } => {
                    debug!("skipped {}: {}", path.display(), reason);
                    report.skipped += 1;
                }
                Outcome::Error { message, .. } => report.errors.push(message),
                Outcome::Fatal { .. } => unreachable!("fatal outcomes short-circuit above"),
            }
        }

        if self.cleanup_after_partition {
            marker::cleanup_bookkeeping(dir);
        }
        Ok(report)
    }

    /// One guarded attempt: marker check, lock, marker recheck, engine,
    /// unconditional marker write. `None` means the file was already
    /// processed.
    fn process_one(
        &self,
        engine: &InjectionEngine,
        path: &Path,
        partition: Partition,
    ) -> Option<Outcome> {
        if marker::is_processed(path) {
            debug!("already processed: {}", path.display());
            return None;
        }

        let _lock = match marker::ArtifactLock::acquire(path) {
            Ok(lock) => lock,
            Err(e) => {
                return Some(Outcome::Error {
                    path: path.to_path_buf(),
                    message: format!("Error locking artifact: {} | {}", path.display(), e),
                });
            }
        };
        // Another worker may have finished while this one waited.
        if marker::is_processed(path) {
            return None;
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| engine.process_file(path, partition)))
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Outcome::Error {
                    path: path.to_path_buf(),
                    message: format!("Worker panic for: {} | {}", path.display(), message),
                }
            }
        };

        // Marker written regardless of outcome, while the lock is held.
        // Fatal outcomes abort the run before any file counts as
        // processed, so they carry no marker and are retried after the
        // configuration is fixed.
        if !matches!(outcome, Outcome::Fatal { .. }) {
            if let Err(e) = marker::mark_processed(path) {
                warn!("failed to write marker for {}: {}", path.display(), e);
            }
        }
        Some(outcome)
    }

    /// Drop byte-identical duplicates across the partition permission
    /// directories; the packaging step rejects them.
    fn prune_duplicate_permissions(&self) {
        let permission_dirs = [
            "system/etc/permissions",
            "system_ext/etc/permissions",
            "vendor/etc/permissions",
            "product/etc/permissions",
        ];
        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        for dir in permission_dirs {
            let dir = self.paths.target_out.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.into_path();
                let Ok(digest) = sha256_file(&path) else {
                    continue;
                };
                if let Some(original) = seen.get(&digest) {
                    warn!(
                        "removing duplicate permission file {} (kept {})",
                        path.display(),
                        original.display()
                    );
                    let _ = fs::remove_file(&path);
                } else {
                    seen.insert(digest, path);
                }
            }
        }
    }

    fn log_summary(&self, report: &RunReport) {
        info!(
            "run complete: {} direct, {} indirect, {} skipped, {} already processed, {} errors",
            report.direct_count(),
            report.indirect_count(),
            report.skipped_count(),
            report.already_processed_count(),
            report.error_count()
        );
        let errors = report.all_errors();
        let (groups, samples) = stats::group_errors_by_prefix(&errors);
        for (prefix, count) in &groups {
            info!("error group `{}`: {} occurrence(s)", prefix, count);
            if let Some(sample) = samples.get(prefix) {
                debug!("sample for `{}`: {}", prefix, sample);
            }
        }
    }
}

/// Enumerate unique artifact paths under a partition directory.
/// Depth-first, symlinked directories not followed, bookkeeping files
/// excluded.
fn enumerate_artifacts(dir: &Path) -> Vec<PathBuf> {
    let unique: BTreeSet<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .filter(|entry| !marker::is_bookkeeping_file(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect();
    unique.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_enumerate_excludes_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("lib64")).unwrap();
        fs::write(root.join("lib64/libfoo.so"), b"x").unwrap();
        fs::write(root.join("lib64/libfoo.so.graft-lock"), b"").unwrap();
        fs::write(root.join("lib64/libfoo.so.graft-processed"), b"").unwrap();
        fs::write(root.join("lib64/com.android.media.apex.original"), b"").unwrap();

        let files = enumerate_artifacts(root);
        assert_eq!(files, vec![root.join("lib64/libfoo.so")]);
    }

    #[test]
    fn test_enumerate_does_not_follow_symlinked_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("real")).unwrap();
        fs::write(root.join("real/file.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("alias")).unwrap();

        let files = enumerate_artifacts(root);
        // The symlinked directory itself is listed as a non-dir entry,
        // but its contents are not traversed twice.
        assert!(files.contains(&root.join("real/file.txt")));
        assert!(!files.contains(&root.join("alias/file.txt")));
    }
}
