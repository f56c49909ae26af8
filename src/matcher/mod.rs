// src/matcher/mod.rs

//! Object-cache candidate search
//!
//! When a grafted file's canonical destination already exists, the
//! build's internal object cache (`obj/<MODULE_TYPE>/...`) is searched
//! for pre-link artifacts the file may legally replace. Matching is by
//! exact basename first, by extension as a fallback, and finally by
//! module-folder name (the cache keys intermediate outputs by
//! `<module>_intermediates` directories whose inner file may be named
//! differently). Architecture and namespace rules act as hard filters
//! throughout: a 32-bit candidate never matches a 64-bit source, an
//! `arm64`-housed candidate never matches an `arm`-housed source, and a
//! platform-namespace candidate never matches a vendor-namespace source.
//!
//! All surviving candidates are returned; the injection engine decides
//! what to do with more than one.

use crate::artifact::{probe_word_size, ArtifactFile, CONTAINER_EXTENSIONS};
use crate::classify::ModuleType;
use crate::config::{Partition, RuleSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory under the target-out tree holding pre-link artifacts.
pub const OBJECT_CACHE_DIR: &str = "obj";

/// Suffixes stripped from cache folder names before module-name
/// comparison.
const INTERMEDIATES_SUFFIX: &str = "_intermediates";
const PREBUILT_SUFFIX: &str = "v1_prebuilt";

/// Platform namespace prefix; candidates inside it only match sources
/// that carry it too.
const PLATFORM_NAMESPACE: &str = "com.android";

/// Search the object cache for files the artifact may replace.
///
/// `search_name` is usually the artifact's basename but may be a
/// vendor-token-stripped variant on the retry pass. Returns every
/// surviving candidate, or an empty list.
pub fn find_candidates(
    artifact: &ArtifactFile,
    search_name: &str,
    module_type: ModuleType,
    partition: Partition,
    target_out: &Path,
    rules: &RuleSet,
) -> Vec<PathBuf> {
    let cache_root = target_out.join(OBJECT_CACHE_DIR);
    let search_root = if module_type.searches_whole_cache() {
        cache_root
    } else {
        cache_root.join(module_type.as_str())
    };
    let partition_filter = if partition.is_unfiltered() {
        None
    } else {
        Some(partition.to_string())
    };

    let all_files: Vec<PathBuf> = WalkDir::new(&search_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    // First pass: exact basename matches, filtered for compatibility.
    // The pool only widens to same-extension files when no file of that
    // name exists at all, not when every namesake is incompatible.
    let exact: Vec<PathBuf> = all_files
        .iter()
        .filter(|path| file_name_of(path) == search_name)
        .cloned()
        .collect();

    let search_extension = extension_of(search_name);
    let pool: Vec<PathBuf> = if !exact.is_empty() {
        debug!(
            "matcher: {} exact basename matches for {}",
            exact.len(),
            search_name
        );
        exact
            .into_iter()
            .filter(|path| is_compatible(artifact, path, module_type))
            .collect()
    } else {
        all_files
            .into_iter()
            .filter(|path| {
                let candidate_extension = extension_of(&file_name_of(path));
                candidate_extension == search_extension
                    || is_container_cross_pair(&search_extension, &candidate_extension)
            })
            .collect()
    };

    let module_name = stem_of(search_name);
    let source_path = artifact.path().to_string_lossy().to_string();
    let mut results = Vec::new();

    for candidate in pool {
        let candidate_path = candidate.to_string_lossy().to_string();

        // vndk/ndk asymmetry: a namespaced candidate never substitutes
        // for a plain source.
        if (candidate_path.contains("vndk") && !source_path.contains("vndk"))
            || (candidate_path.contains("ndk") && !source_path.contains("ndk"))
        {
            continue;
        }

        if !is_compatible(artifact, &candidate, module_type) {
            continue;
        }

        let candidate_name = file_name_of(&candidate);
        if candidate_name == search_name {
            if let Some(partition_name) = &partition_filter {
                if !candidate_path.contains(partition_name.as_str()) {
                    continue;
                }
            }
            if candidate_path.contains(PLATFORM_NAMESPACE)
                && !source_path.contains(PLATFORM_NAMESPACE)
            {
                debug!(
                    "matcher: namespace rule drops {} for {}",
                    candidate_path, source_path
                );
                continue;
            }
            results.push(candidate);
        } else if folder_module_name(&candidate, partition_filter.as_deref()) == module_name {
            if let Some(partition_name) = &partition_filter {
                if !candidate_path.contains(partition_name.as_str()) {
                    continue;
                }
            }
            let candidate_extension = extension_of(&candidate_name);
            if candidate_extension.eq_ignore_ascii_case(&search_extension) {
                results.push(candidate);
            } else if is_container_cross_pair(&search_extension, &candidate_extension)
                && rules.allow_container_merge
            {
                // A supplied plain container may stand in for the
                // build's compressed one (and the other way around)
                // when merging is on.
                results.push(candidate);
            }
        }
    }

    debug!(
        "matcher: {} candidates for {} under {}",
        results.len(),
        search_name,
        search_root_display(target_out, module_type)
    );
    results
}

fn search_root_display(target_out: &Path, module_type: ModuleType) -> String {
    if module_type.searches_whole_cache() {
        target_out.join(OBJECT_CACHE_DIR).display().to_string()
    } else {
        target_out
            .join(OBJECT_CACHE_DIR)
            .join(module_type.as_str())
            .display()
            .to_string()
    }
}

/// Architecture and layout compatibility between a source artifact and a
/// cache candidate.
pub fn is_compatible(artifact: &ArtifactFile, candidate: &Path, module_type: ModuleType) -> bool {
    // Java archives are architecture-neutral; no filter applies.
    if module_type == ModuleType::JavaLibrary {
        return true;
    }

    if module_type.is_abi_checked() && artifact.is_elf() {
        match (probe_word_size(candidate), artifact.word_size()) {
            (Some(candidate_size), Some(source_size)) if candidate_size == source_size => {}
            _ => {
                debug!(
                    "matcher: word-size mismatch {} vs {}",
                    artifact.path().display(),
                    candidate.display()
                );
                return false;
            }
        }
    }

    if artifact.path_contains("arm") && !parent_arm_agreement(artifact.path(), candidate) {
        return false;
    }

    true
}

/// arm/arm64 parent-directory exclusivity. A source housed under an
/// `arm64` directory only matches candidates housed under `arm64`; a
/// source under `arm` only matches `arm`-but-not-`arm64` candidates.
fn parent_arm_agreement(source: &Path, candidate: &Path) -> bool {
    let source_parent = parent_name(source);
    let candidate_parent = parent_name(candidate);
    match source_parent.as_str() {
        "arm64" => candidate_parent.contains("arm64"),
        "arm" => candidate_parent.contains("arm") && !candidate_parent.contains("arm64"),
        _ => false,
    }
}

fn parent_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Cache folder name reduced to the module name it was keyed by.
fn folder_module_name(candidate: &Path, partition_name: Option<&str>) -> String {
    let parent = candidate
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut stripped = parent.replace(INTERMEDIATES_SUFFIX, "");
    if let Some(partition_name) = partition_name {
        stripped = stripped.replace(&format!("_{}", partition_name), "");
    }
    stripped = stripped.replace(PREBUILT_SUFFIX, "");
    Path::new(&stripped)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_container_cross_pair(a: &str, b: &str) -> bool {
    let [plain, compressed] = CONTAINER_EXTENSIONS;
    (a == plain && b == compressed) || (a == compressed && b == plain)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn extension_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[idx..].to_string(),
        _ => String::new(),
    }
}

fn stem_of(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[..idx].to_string(),
        _ => file_name.to_string(),
    }
}
