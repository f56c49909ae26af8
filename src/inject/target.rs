// src/inject/target.rs

//! Destination-path computation
//!
//! A supplied artifact's destination inside the build output tree is
//! derived from its source path: everything after the partition segment
//! is replayed under the partition's output directory, with the nested
//! partition aliases the source trees carry (`system/vendor`,
//! `system/product`, ...) rewritten to their real top-level homes.
//! Isolated-namespace libraries are routed into the synthetic namespace
//! directory instead of their literal location.

use crate::artifact::{ArtifactFile, WordSize};
use crate::config::{Partition, RuleSet};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Nested partition aliases rewritten after the sub-path is assembled.
const PARTITION_REWRITES: [(&str, &str); 4] = [
    ("/system/system/", "/system/"),
    ("/system/system_ext/", "/system_ext/"),
    ("/system/vendor/", "/vendor/"),
    ("/system/product/", "/product/"),
];

/// Compute the canonical destination for an artifact.
pub fn compute_target(
    artifact: &ArtifactFile,
    partition: Partition,
    target_out: &Path,
    rules: &RuleSet,
) -> PathBuf {
    let effective = partition.effective();
    let partition_dir = target_out.join(effective.to_string());
    let subfolders = subfolders_after(artifact.path(), &effective.to_string());

    let target_dir = if subfolders.is_empty() {
        partition_dir
    } else if uses_isolated_namespace(artifact, rules) {
        debug!(
            "isolated-namespace routing for {}",
            artifact.path().display()
        );
        partition_dir.join(&rules.synthetic_namespace)
    } else {
        let mut dir = partition_dir;
        for folder in &subfolders {
            dir = dir.join(folder);
        }
        rewrite_partition_aliases(&dir)
    };

    target_dir.join(artifact.file_name())
}

/// Path components strictly between the first `term` segment and the
/// file name.
fn subfolders_after(path: &Path, term: &str) -> Vec<String> {
    let components: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    let Some(idx) = components.iter().position(|c| c == term) else {
        return Vec::new();
    };
    let rest = &components[idx + 1..];
    if rest.len() <= 1 {
        // Only the file name remains.
        return Vec::new();
    }
    rest[..rest.len() - 1].to_vec()
}

/// A 64-bit shared library on the isolated-namespace list lands in the
/// synthetic namespace directory instead of its literal sub-path.
fn uses_isolated_namespace(artifact: &ArtifactFile, rules: &RuleSet) -> bool {
    if !rules.use_isolated_namespace {
        return false;
    }
    let versioned_library = match artifact.extension() {
        Some(".so") => true,
        // Versioned shared objects: libfoo.so.1 has extension ".1".
        Some(ext) => ext.len() == 2 && ext[1..].chars().all(|c| c.is_ascii_digit()),
        None => false,
    };
    versioned_library
        && artifact.path_contains("/lib")
        && artifact.word_size() == Some(WordSize::Bits64)
        && rules
            .isolated_namespace_libraries
            .iter()
            .any(|n| n == artifact.file_name())
}

fn rewrite_partition_aliases(dir: &Path) -> PathBuf {
    // The rewrites need the trailing slash to anchor on whole segments.
    let mut text = format!("{}/", dir.to_string_lossy());
    for (from, to) in PARTITION_REWRITES {
        text = text.replace(from, to);
    }
    PathBuf::from(text.trim_end_matches('/'))
}
