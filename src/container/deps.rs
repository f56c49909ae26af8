// src/container/deps.rs

//! Native dependency bundling for synthesized containers
//!
//! A synthesized single-binary container must be self-contained: every
//! shared library the binary links is bundled under `lib64/`. The
//! external dependency-tree lister reports resolved and unresolved
//! libraries; unresolved ones are hunted down in the supplied partition
//! tree, 64-bit copies only.

use super::ContainerContext;
use crate::artifact::{probe_word_size, WordSize};
use crate::config::Partition;
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const DEPENDENCY_LISTER: &str = "lddtree";

/// Libraries never bundled: provided by the runtime itself.
const EXCLUDED_LIBRARIES: [&str; 1] = ["libc.so"];
const EXCLUDED_PATH_KEYWORDS: [&str; 2] = ["bionic", "com_android_vndk"];

/// Runtime libraries the lister never reports but the loader demands.
const IMPLICIT_LIBRARIES: [&str; 3] = [
    "heapprofd_client_api.so",
    "libandroid.so",
    "libartpalette-system.so",
];

/// Collect and copy the binary's native dependencies into
/// `<extract_dir>/lib64`.
pub fn bundle_dependencies(
    binary: &Path,
    partition: Partition,
    extract_dir: &Path,
    ctx: &ContainerContext,
) -> Result<()> {
    let partition_root = partition_root_of(binary, partition).ok_or_else(|| Error::Container {
        path: binary.to_path_buf(),
        message: format!("partition segment `{}` not in source path", partition),
    })?;

    let lib_dir = extract_dir.join("lib64");
    fs::create_dir_all(&lib_dir).map_err(|e| Error::io(&lib_dir, e))?;

    let (resolved, mut unresolved) = list_dependencies(binary, &partition_root, ctx)?;
    unresolved.extend(IMPLICIT_LIBRARIES.iter().map(|s| s.to_string()));

    for library in resolved {
        // The lister's first report line is the binary itself.
        if library == binary {
            continue;
        }
        let name = file_name_of(&library);
        if is_excluded(&name, &library.to_string_lossy()) {
            continue;
        }
        let dst = lib_dir.join(&name);
        fs::copy(&library, &dst).map_err(|e| Error::io(&library, e))?;
        debug!("bundled resolved dependency {}", name);
    }

    for name in unresolved {
        if is_excluded(&name, &name) {
            continue;
        }
        match find_64bit_library(&partition_root, &name) {
            Some(found) => {
                let dst = lib_dir.join(&name);
                fs::copy(&found, &dst).map_err(|e| Error::io(&found, e))?;
                debug!("bundled searched dependency {} from {}", name, found.display());
            }
            None => warn!("dependency {} not found under {}", name, partition_root.display()),
        }
    }

    info!(
        "dependency bundle complete for {} under {}",
        binary.display(),
        lib_dir.display()
    );
    Ok(())
}

/// Invoke the dependency-tree lister with the partition's library
/// directories on the search path and parse its report.
fn list_dependencies(
    binary: &Path,
    partition_root: &Path,
    ctx: &ContainerContext,
) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let lib_dirs: Vec<String> = WalkDir::new(partition_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name().to_string_lossy() == "lib64")
        .map(|e| e.path().to_string_lossy().to_string())
        .collect();

    let lister = ctx.tools.locate(DEPENDENCY_LISTER)?;
    let output = ctx.tools.run_env(
        &lister,
        [binary.as_os_str()],
        &[("LD_LIBRARY_PATH", lib_dirs.join(":"))],
    )?;
    if !output.success {
        return Err(Error::Tool {
            tool: DEPENDENCY_LISTER.to_string(),
            message: output.diagnostic(),
        });
    }
    Ok(parse_lister_output(&output.stdout))
}

/// Parse `name => path` report lines. A right-hand side of `not found`
/// files the left-hand name under unresolved.
fn parse_lister_output(text: &str) -> (Vec<PathBuf>, Vec<String>) {
    let mut resolved = BTreeSet::new();
    let mut unresolved = BTreeSet::new();

    for line in text.lines() {
        let Some((lhs, rhs)) = line.split_once("=>") else {
            continue;
        };
        let name = lhs.trim().to_string();
        let rhs = rhs.trim();
        if rhs.starts_with("not found") {
            unresolved.insert(name);
        } else if rhs.starts_with('/') {
            resolved.insert(PathBuf::from(rhs.split_whitespace().next().unwrap_or(rhs)));
        }
    }

    (
        resolved.into_iter().collect(),
        unresolved.into_iter().collect(),
    )
}

/// Search the partition tree for a 64-bit copy of a library.
fn find_64bit_library(partition_root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(partition_root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy() == name)
        .map(|e| e.into_path())
        .find(|path| {
            !EXCLUDED_PATH_KEYWORDS
                .iter()
                .any(|k| path.to_string_lossy().contains(k))
                && probe_word_size(path) == Some(WordSize::Bits64)
        })
}

fn is_excluded(name: &str, path: &str) -> bool {
    EXCLUDED_LIBRARIES.iter().any(|l| l == &name)
        || EXCLUDED_PATH_KEYWORDS.iter().any(|k| path.contains(k))
}

/// Path prefix up to and including the first `partition` segment.
fn partition_root_of(path: &Path, partition: Partition) -> Option<PathBuf> {
    let term = partition.to_string();
    let mut root = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => {
                root.push(name);
                if name.to_string_lossy() == term {
                    return Some(root);
                }
            }
            other => root.push(other.as_os_str()),
        }
    }
    None
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lister_output() {
        let report = "\
monitor => /work/system/bin/monitor (interpreter => none)\n\
    libutils.so => /work/system/lib64/libutils.so\n\
    libmissing.so => not found\n\
    libdl.so => /work/system/lib64/libdl.so\n";
        let (resolved, unresolved) = parse_lister_output(report);
        assert_eq!(
            resolved,
            vec![
                PathBuf::from("/work/system/bin/monitor"),
                PathBuf::from("/work/system/lib64/libdl.so"),
                PathBuf::from("/work/system/lib64/libutils.so"),
            ]
        );
        assert_eq!(unresolved, vec!["libmissing.so".to_string()]);
    }

    #[test]
    fn test_partition_root_of() {
        assert_eq!(
            partition_root_of(
                Path::new("/work/supplied/vendor/bin/monitor"),
                Partition::Vendor
            ),
            Some(PathBuf::from("/work/supplied/vendor"))
        );
        assert_eq!(
            partition_root_of(Path::new("/work/supplied/odm/bin/monitor"), Partition::System),
            None
        );
    }

    #[test]
    fn test_exclusions() {
        assert!(is_excluded("libc.so", "/any/libc.so"));
        assert!(is_excluded("libx.so", "/apex/com_android_vndk/libx.so"));
        assert!(!is_excluded("libutils.so", "/system/lib64/libutils.so"));
    }
}
