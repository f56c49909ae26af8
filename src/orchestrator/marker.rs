// src/orchestrator/marker.rs

//! Per-artifact lock and completion marker
//!
//! Two sibling files make the pipeline idempotent and crash-resumable:
//! an advisory lock file held for the duration of one processing attempt
//! and a completion marker written unconditionally when the attempt ends
//! (success or failure — at-most-once, not at-least-once). The marker is
//! staged through a temporary file and renamed into place while the lock
//! is still held, so no observer can see a half-written marker between
//! lock release and marker visibility.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of the advisory lock file placed beside an artifact.
pub const LOCK_SUFFIX: &str = ".graft-lock";
/// Suffix of the completion marker placed beside an artifact.
pub const PROCESSED_SUFFIX: &str = ".graft-processed";

/// Bookkeeping suffixes that must never be treated as artifacts during
/// enumeration. Container backups are included: they are pipeline
/// residue, not supplied files.
const BOOKKEEPING_SUFFIXES: [&str; 4] = [
    LOCK_SUFFIX,
    PROCESSED_SUFFIX,
    crate::container::BACKUP_SUFFIX,
    crate::container::COMPRESSED_BACKUP_SUFFIX,
];

/// True for lock files, markers and container backups.
pub fn is_bookkeeping_file(file_name: &str) -> bool {
    BOOKKEEPING_SUFFIXES
        .iter()
        .any(|suffix| file_name.ends_with(suffix))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}

pub fn lock_path(artifact: &Path) -> PathBuf {
    sibling(artifact, LOCK_SUFFIX)
}

pub fn marker_path(artifact: &Path) -> PathBuf {
    sibling(artifact, PROCESSED_SUFFIX)
}

/// Whether an earlier attempt (this run or a crashed one) completed.
pub fn is_processed(artifact: &Path) -> bool {
    marker_path(artifact).exists()
}

/// Write the completion marker atomically: temp file in the same
/// directory, then rename.
pub fn mark_processed(artifact: &Path) -> Result<()> {
    let marker = marker_path(artifact);
    let dir = marker
        .parent()
        .ok_or_else(|| Error::Lock {
            path: marker.clone(),
            message: "marker has no parent directory".to_string(),
        })?;
    let staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    staged.persist(&marker).map_err(|e| Error::io(&marker, e.error))?;
    debug!("marker written: {}", marker.display());
    Ok(())
}

/// Exclusive advisory lock on one artifact, held from classification
/// through outcome recording. Released on drop.
pub struct ArtifactLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl ArtifactLock {
    /// Acquire the lock, blocking until it is free.
    pub fn acquire(artifact: &Path) -> Result<Self> {
        let path = lock_path(artifact);
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        file.lock_exclusive().map_err(|e| Error::Lock {
            path: path.clone(),
            message: format!("failed to acquire artifact lock: {}", e),
        })?;
        debug!("lock acquired: {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        // flock is released when the handle closes.
        debug!("lock released: {}", self.path.display());
    }
}

/// Remove locks, markers and container backups under a directory. Kept
/// as a separate pass so resumed and repeated runs can still see the
/// markers; callers opt in after a verified-complete partition.
pub fn cleanup_bookkeeping(dir: &Path) -> usize {
    let mut removed = 0usize;
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_bookkeeping_file(&name) && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    debug!("cleanup removed {} bookkeeping files under {}", removed, dir.display());
    removed
}
