// src/container/mod.rs

//! Container transform pipeline
//!
//! Signed container bundles cannot be grafted byte-for-byte: the build's
//! verifier rejects the vendor signature, the manifest may describe a
//! different build generation, and a merged container must carry files
//! from both sides. Every container therefore passes through extract →
//! (optionally merge) → repackage → sign before the normal injection
//! strategy places the result.
//!
//! Each operation is restartable: the pristine container is copied to a
//! `.original` backup before the first transform, a pre-existing backup
//! is restored before a rerun, and any stage failure restores the backup
//! so the file on disk is never a half-transformed container.

mod deps;
mod fsconfig;
mod keys;
mod manifest;
mod transform;

pub use fsconfig::generate_fs_config;
pub use keys::KeyBundle;

use crate::artifact::CONTAINER_EXTENSIONS;
use crate::config::{BuildPaths, Partition, RuleSet};
use crate::error::{Error, Result};
use crate::naming;
use crate::tools::Toolchain;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Backup of the pristine container, kept beside it.
pub const BACKUP_SUFFIX: &str = ".original";
/// Backup of a compressed container after decompression replaced it.
pub const COMPRESSED_BACKUP_SUFFIX: &str = ".original-capex";

/// Everything the container operations need, passed explicitly.
pub struct ContainerContext<'a> {
    pub rules: &'a RuleSet,
    pub paths: &'a BuildPaths,
    pub tools: &'a Toolchain,
}

/// Container identity: the normalized stem with vendor tokens removed.
pub fn identity_of(rules: &RuleSet, file_name: &str) -> String {
    let canonical = naming::canonical_file_name(rules, file_name);
    let stripped = naming::strip_vendor_tokens(rules, &canonical);
    let mut identity = stripped;
    for ext in CONTAINER_EXTENSIONS {
        identity = identity.trim_end_matches(ext).to_string();
    }
    identity
        .replace("_compressed", "")
        .replace("_trimmed", "")
}

/// Decompress a compressed container next to itself and park the
/// compressed original under a backup name. Returns the plain container
/// path.
pub fn prepare_compressed(compressed: &Path, ctx: &ContainerContext) -> Result<PathBuf> {
    let file_name = compressed
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let plain = compressed.with_file_name(file_name.replace(".capex", ".apex"));
    ctx.tools.decompress_container(compressed, &plain)?;
    let backup = backup_path(compressed, COMPRESSED_BACKUP_SUFFIX);
    fs::rename(compressed, &backup).map_err(|e| Error::io(compressed, e))?;
    info!(
        "decompressed container {} -> {}",
        backup.display(),
        plain.display()
    );
    Ok(plain)
}

/// Merge a supplied container with the base build's container of the
/// same identity, then repackage, sign and replace the supplied file.
pub fn merge_with_base(container: &Path, ctx: &ContainerContext) -> Result<()> {
    let backup = backup_original(container)?;
    match merge_inner(container, ctx) {
        Ok(()) => Ok(()),
        Err(e) => {
            restore_original(container, &backup);
            Err(wrap_stage_failure(container, e))
        }
    }
}

/// Stage failures become container errors, but configuration-integrity
/// failures (missing key material, missing mandatory manifest) keep
/// their type so the orchestrator can abort the run.
fn wrap_stage_failure(container: &Path, e: Error) -> Error {
    match e {
        fatal @ (Error::KeyMaterial(_) | Error::Config(_)) => fatal,
        wrapped @ Error::Container { .. } => wrapped,
        other => Error::Container {
            path: container.to_path_buf(),
            message: other.to_string(),
        },
    }
}

fn merge_inner(container: &Path, ctx: &ContainerContext) -> Result<()> {
    let file_name = file_name_of(container);
    let identity = identity_of(ctx.rules, &file_name);

    if ctx.rules.check_vndk_version && !vndk_merge_allowed(container, &file_name, ctx.rules)? {
        return Err(Error::Container {
            path: container.to_path_buf(),
            message: "base vndk generation is newer than the supplied container".to_string(),
        });
    }

    let base_dir = base_container_dir(&file_name, ctx).ok_or_else(|| Error::Container {
        path: container.to_path_buf(),
        message: format!("no base container directory for identity {}", identity),
    })?;

    let work_root = TempDir::new().map_err(|e| Error::io(container, e))?;
    let merged_extract = work_root.path().join("merged");
    let vendor_extract = work_root.path().join("vendor");
    fs::create_dir_all(&merged_extract).map_err(|e| Error::io(&merged_extract, e))?;
    fs::create_dir_all(&vendor_extract).map_err(|e| Error::io(&vendor_extract, e))?;

    ctx.tools.extract_container(container, &vendor_extract)?;

    if ctx.rules.matches_mixed_keyword(&file_name) {
        // Mixed mode starts from the full base tree and layers the
        // supplied files on top.
        info!("mixed-mode merge for {}", file_name);
        transform::copy_tree(&base_dir, &merged_extract)?;
    } else {
        manifest::import_base_manifest(&base_dir, &merged_extract, &identity, ctx)?;
    }

    if ctx.rules.inject_container_files {
        transform::layer_files(&merged_extract, &vendor_extract, ctx.rules)?;
    } else {
        debug!("container file layering disabled by configuration");
    }

    let injected_apps = if ctx.rules.inject_container_apps {
        transform::layer_apps(&merged_extract, &vendor_extract)?
    } else {
        Vec::new()
    };

    let fs_config = work_root.path().join("fs_config");
    fsconfig::generate_fs_config(&merged_extract, &fs_config, Some(&injected_apps))?;

    let manifest_path = manifest::stage_manifest(&merged_extract, &identity, ctx)?;
    debug!("merged container manifest at {}", manifest_path.display());

    let bundle = keys::resolve_existing(&file_name, ctx)?;
    let file_contexts = keys::file_contexts_for(&file_name, ctx)
        .map(Ok)
        .unwrap_or_else(|| fsconfig::write_default_file_contexts(work_root.path()))?;

    let merged_out = output_path(container);
    ctx.tools.package_container(
        &merged_extract,
        &merged_out,
        &bundle.private_pem,
        &bundle.public_key,
        &file_contexts,
        &fs_config,
    )?;
    ctx.tools
        .sign_container(&merged_out, &bundle.certificate, &bundle.private_key)?;

    replace_with(container, &merged_out)?;
    info!("merged container ready: {}", container.display());

    if ctx.rules.replace_verity_keys {
        replace_cached_public_key(container, &bundle.public_key, ctx)?;
    }
    Ok(())
}

/// Repackage a single container with fresh key material: extract,
/// re-sign embedded app packages, regenerate the file-mode table,
/// repackage and sign.
pub fn repackage(container: &Path, ctx: &ContainerContext) -> Result<()> {
    let backup = backup_original(container)?;
    match repackage_inner(container, ctx) {
        Ok(()) => Ok(()),
        Err(e) => {
            restore_original(container, &backup);
            Err(wrap_stage_failure(container, e))
        }
    }
}

fn repackage_inner(container: &Path, ctx: &ContainerContext) -> Result<()> {
    let file_name = file_name_of(container);
    let identity = identity_of(ctx.rules, &file_name);

    let work_root = TempDir::new().map_err(|e| Error::io(container, e))?;
    let extract_dir = work_root.path().join("extract");
    fs::create_dir_all(&extract_dir).map_err(|e| Error::io(&extract_dir, e))?;

    ctx.tools.extract_container(container, &extract_dir)?;
    transform::resign_embedded_apps(&extract_dir, ctx);

    let fs_config = work_root.path().join("fs_config");
    fsconfig::generate_fs_config(&extract_dir, &fs_config, None)?;

    let manifest_path = manifest::stage_manifest(&extract_dir, &identity, ctx)?;
    debug!("repack manifest at {}", manifest_path.display());

    let (_key_dir, bundle) = keys::generate_fresh(&identity, ctx)?;
    let file_contexts = fsconfig::write_default_file_contexts(work_root.path())?;

    let repacked = output_path(container);
    ctx.tools.package_container(
        &extract_dir,
        &repacked,
        &bundle.private_pem,
        &bundle.public_key,
        &file_contexts,
        &fs_config,
    )?;
    ctx.tools
        .sign_container(&repacked, &bundle.certificate, &bundle.private_key)?;

    replace_with(container, &repacked)?;
    info!("repackaged container ready: {}", container.display());
    Ok(())
}

/// Wrap an isolated-namespace executable into a freshly synthesized
/// single-purpose container, collecting its native dependencies from the
/// supplied partition tree.
pub fn synthesize_binary_container(
    binary: &Path,
    partition: Partition,
    ctx: &ContainerContext,
) -> Result<()> {
    let file_name = file_name_of(binary);
    let identity = format!(
        "com.android.{}.{}",
        ctx.rules.synthetic_namespace, file_name
    );
    info!(
        "synthesizing container {} for binary {}",
        identity,
        binary.display()
    );

    let work_root = TempDir::new().map_err(|e| Error::io(binary, e))?;
    let extract_dir = work_root.path().join("extract");
    let bin_dir = extract_dir.join("bin");
    fs::create_dir_all(&bin_dir).map_err(|e| Error::io(&bin_dir, e))?;

    let staged_binary = bin_dir.join(&file_name);
    fs::copy(binary, &staged_binary).map_err(|e| Error::io(binary, e))?;
    set_mode(&staged_binary, 0o700)?;

    deps::bundle_dependencies(binary, partition, &extract_dir, ctx)?;

    let fs_config = work_root.path().join("fs_config");
    fsconfig::generate_fs_config(&extract_dir, &fs_config, None)?;

    manifest::synthesize_manifest(&extract_dir, &identity, 1, ctx)?;

    let (_key_dir, bundle) = keys::generate_fresh(&identity, ctx)?;
    let file_contexts = fsconfig::write_default_file_contexts(work_root.path())?;

    let out_dir = ctx
        .paths
        .product_out
        .join(partition.effective().to_string())
        .join("apex");
    fs::create_dir_all(&out_dir).map_err(|e| Error::io(&out_dir, e))?;
    let out_file = out_dir.join(format!("{}.apex", identity));

    ctx.tools.package_container(
        &extract_dir,
        &out_file,
        &bundle.private_pem,
        &bundle.public_key,
        &file_contexts,
        &fs_config,
    )?;
    ctx.tools
        .sign_container(&out_file, &bundle.certificate, &bundle.private_key)?;
    info!("synthesized container placed at {}", out_file.display());
    Ok(())
}

/// Locate the base build's extracted container directory for a supplied
/// container, via the identity-keyword routing table.
pub fn base_container_dir(file_name: &str, ctx: &ContainerContext) -> Option<PathBuf> {
    let identity = identity_of(ctx.rules, file_name);
    let base_root = ctx.paths.target_out.join("apex");

    for (keyword, dir_name) in &ctx.rules.base_container_dirs {
        if !identity.contains(keyword.as_str()) {
            continue;
        }
        // `media` alone must not claim the provider or codec modules.
        if keyword == "media" && (identity.contains("mediaprovider") || identity.contains("swcodec"))
        {
            continue;
        }
        let dir = base_root.join(dir_name);
        if dir.exists() {
            return Some(dir);
        }
        warn!(
            "base container directory missing for {}: {}",
            identity,
            dir.display()
        );
        return None;
    }
    None
}

/// Copy the pristine container aside, or restore it if a backup from an
/// earlier attempt exists. Returns the backup path.
fn backup_original(container: &Path) -> Result<PathBuf> {
    let backup = backup_path(container, BACKUP_SUFFIX);
    if backup.exists() {
        debug!("restoring pristine container from {}", backup.display());
        fs::copy(&backup, container).map_err(|e| Error::io(&backup, e))?;
    } else {
        fs::copy(container, &backup).map_err(|e| Error::io(container, e))?;
    }
    Ok(backup)
}

fn restore_original(container: &Path, backup: &Path) {
    if let Err(e) = fs::copy(backup, container) {
        warn!(
            "failed to restore pristine container {} from {}: {}",
            container.display(),
            backup.display(),
            e
        );
    }
}

fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}

/// Sibling scratch path the repackaged container is written to before it
/// replaces the original.
fn output_path(container: &Path) -> PathBuf {
    let name = file_name_of(container).replace(".apex", ".v2.apex");
    container.with_file_name(name)
}

fn replace_with(container: &Path, staged: &Path) -> Result<()> {
    fs::remove_file(container).map_err(|e| Error::io(container, e))?;
    fs::copy(staged, container).map_err(|e| Error::io(staged, e))?;
    fs::remove_file(staged).map_err(|e| Error::io(staged, e))?;
    Ok(())
}

/// Overwrite the cached public-key object for this container identity so
/// image verification accepts the fresh signature.
fn replace_cached_public_key(
    container: &Path,
    public_key: &Path,
    ctx: &ContainerContext,
) -> Result<()> {
    let stem = file_name_of(container);
    let stem = stem.trim_end_matches(".apex").trim_end_matches(".capex");
    let cached = ctx
        .paths
        .target_out
        .join("obj/ETC")
        .join(format!("apex_pubkey.{}_intermediates", stem))
        .join("apex_pubkey");
    if !cached.exists() {
        debug!("no cached public key to replace at {}", cached.display());
        return Ok(());
    }
    fs::copy(public_key, &cached).map_err(|e| Error::io(&cached, e))?;
    info!("replaced cached public key at {}", cached.display());
    Ok(())
}

/// Scan a container for a vndk generation marker and compare it with the
/// base build's generation.
fn vndk_merge_allowed(container: &Path, file_name: &str, rules: &RuleSet) -> Result<bool> {
    if !file_name.contains("vndk") {
        return Ok(true);
    }
    let data = fs::read(container).map_err(|e| Error::io(container, e))?;
    let supplied = extract_vndk_generation(&data);
    if supplied == 0 {
        warn!("no vndk generation marker in {}", container.display());
        return Ok(false);
    }
    Ok(rules.base_vndk_version <= supplied)
}

/// Find an ASCII `com.android.vndk.v<NN>` marker and return `NN`.
fn extract_vndk_generation(data: &[u8]) -> u32 {
    const MARKER: &[u8] = b"com.android.vndk.v";
    let mut offset = 0;
    while let Some(idx) = find_subslice(&data[offset..], MARKER) {
        let start = offset + idx + MARKER.len();
        let digits: String = data[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|b| *b as char)
            .collect();
        if let Ok(generation) = digits.parse::<u32>() {
            if generation != 0 {
                return generation;
            }
        }
        offset = start;
    }
    0
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}
