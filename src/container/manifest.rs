// src/container/manifest.rs

//! Container identity manifests
//!
//! Every container carries a binary identity manifest at its root. The
//! pipeline reuses an existing binary manifest when the extracted tree
//! has one, imports the base build's manifest during a merge, and
//! otherwise synthesizes a JSON manifest from the identity name and
//! converts it with the external converter (retried once). JSON
//! manifests coming out of the build tree contain placeholder lines that
//! the converter rejects; those are cleaned first.

use super::ContainerContext;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const MANIFEST_BINARY: &str = "apex_manifest.pb";
const MANIFEST_JSON_CANDIDATES: [&str; 3] =
    ["apex_manifest.json", "manifest.json", "manifest-art.json"];

/// Version stamped into synthesized manifests; large enough to win any
/// updatable-module version comparison.
const SYNTHESIZED_VERSION: u64 = 999_999;

/// Ensure the extracted tree has its binary manifest at the root,
/// surfacing one found in a subdirectory or synthesizing a fresh one.
/// Returns the staged manifest path.
pub fn stage_manifest(
    extract_dir: &Path,
    identity: &str,
    ctx: &ContainerContext,
) -> Result<PathBuf> {
    let staged = extract_dir.join(MANIFEST_BINARY);

    if let Some(found) = find_binary_manifest(extract_dir) {
        if found != staged {
            fs::copy(&found, &staged).map_err(|e| Error::io(&found, e))?;
            fs::remove_file(&found).map_err(|e| Error::io(&found, e))?;
            debug!(
                "moved binary manifest {} -> {}",
                found.display(),
                staged.display()
            );
        }
        return Ok(staged);
    }

    info!(
        "no binary manifest in extracted tree, synthesizing for {}",
        identity
    );
    synthesize_manifest(extract_dir, identity, SYNTHESIZED_VERSION, ctx)?;
    Ok(staged)
}

/// Write a JSON manifest for `identity` and convert it to the binary
/// form at the tree root.
pub fn synthesize_manifest(
    extract_dir: &Path,
    identity: &str,
    version: u64,
    ctx: &ContainerContext,
) -> Result<PathBuf> {
    let json_path = extract_dir.join("apex_manifest.json");
    let content = format!("{{\n  \"name\": \"{}\",\n  \"version\": {}\n}}\n", identity, version);
    fs::write(&json_path, content).map_err(|e| Error::io(&json_path, e))?;

    let staged = extract_dir.join(MANIFEST_BINARY);
    ctx.tools.convert_manifest(&json_path, &staged)?;
    fs::remove_file(&json_path).map_err(|e| Error::io(&json_path, e))?;
    Ok(staged)
}

/// Import the base build's manifest into a merged tree: the base's
/// binary manifest byte-for-byte when present, otherwise the routed
/// module's JSON manifest cleaned and converted.
pub fn import_base_manifest(
    base_dir: &Path,
    merged_extract: &Path,
    identity: &str,
    ctx: &ContainerContext,
) -> Result<()> {
    let staged = merged_extract.join(MANIFEST_BINARY);
    let base_manifest = base_dir.join(MANIFEST_BINARY);
    if base_manifest.exists() {
        fs::copy(&base_manifest, &staged).map_err(|e| Error::io(&base_manifest, e))?;
        debug!(
            "imported base manifest {} -> {}",
            base_manifest.display(),
            staged.display()
        );
        return Ok(());
    }

    // No manifest in the base tree: fall back to the module sources
    // named by the key routing table.
    let segments: Vec<String> = identity.split('.').map(|s| s.to_lowercase()).collect();
    for (keyword, module_dir) in &ctx.rules.container_key_paths {
        if !segments.iter().any(|s| s == &keyword.to_lowercase()) {
            continue;
        }
        let module_path = ctx.paths.build_root.join(module_dir);
        for candidate in MANIFEST_JSON_CANDIDATES {
            let json_path = module_path.join(candidate);
            if !json_path.exists() {
                continue;
            }
            let cleaned = merged_extract.join("apex_manifest_cleaned.json");
            clean_manifest_json(&json_path, &cleaned)?;
            ctx.tools.convert_manifest(&cleaned, &staged)?;
            fs::remove_file(&cleaned).map_err(|e| Error::io(&cleaned, e))?;
            info!(
                "converted module manifest {} for {}",
                json_path.display(),
                identity
            );
            return Ok(());
        }
    }

    // A container without any manifest source is a configuration-
    // integrity problem, not a per-file one.
    Err(Error::Config(format!(
        "no manifest available for container identity {}",
        identity
    )))
}

/// Drop build-placeholder lines the converter rejects and replace the
/// placeholder zero version.
pub fn clean_manifest_json(input: &Path, output: &Path) -> Result<()> {
    let content = fs::read_to_string(input).map_err(|e| Error::io(input, e))?;
    let cleaned: String = content
        .lines()
        .filter(|line| {
            !line.contains("Placeholder module version to be replaced during build.")
                && !line.contains("Do not change!")
        })
        .map(|line| {
            if line.contains("\"version\": 0") {
                line.replace("\"version\": 0", "\"version\": 999")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    // The cleaned document must still parse.
    serde_json::from_str::<serde_json::Value>(&cleaned).map_err(|e| {
        Error::Container {
            path: input.to_path_buf(),
            message: format!("manifest not valid JSON after cleanup: {}", e),
        }
    })?;
    fs::write(output, cleaned).map_err(|e| Error::io(output, e))?;
    Ok(())
}

fn find_binary_manifest(extract_dir: &Path) -> Option<PathBuf> {
    WalkDir::new(extract_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_string_lossy() == MANIFEST_BINARY)
        .map(|e| e.into_path())
}
