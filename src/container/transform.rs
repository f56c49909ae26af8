// src/container/transform.rs

//! File layering inside an extracted container tree.

use super::ContainerContext;
use crate::apps;
use crate::config::RuleSet;
use crate::error::{Error, Result};
use crate::orchestrator::marker;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Copy a whole extracted tree, preserving symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(src, e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            let _ = fs::remove_file(&target);
            std::os::unix::fs::symlink(&link, &target).map_err(|e| Error::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;
        }
    }
    Ok(())
}

/// Layer the supplied container's plain files over the merged tree,
/// honoring the container file-extension policy. App packages are
/// handled separately by [`layer_apps`]; symlinks are recreated as
/// symlinks; the binary manifest never crosses over.
pub fn layer_files(merged: &Path, vendor_src: &Path, rules: &RuleSet) -> Result<()> {
    let mut layered = 0usize;
    for entry in WalkDir::new(vendor_src).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(vendor_src, e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let rel = path.strip_prefix(vendor_src).unwrap_or(path);
        let dst = merged.join(rel);

        if entry.file_type().is_symlink() {
            let link = fs::read_link(path).map_err(|e| Error::io(path, e))?;
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            let _ = fs::remove_file(&dst);
            std::os::unix::fs::symlink(&link, &dst).map_err(|e| Error::io(&dst, e))?;
            layered += 1;
            continue;
        }

        if file_name.ends_with(".apk") {
            continue;
        }
        if marker::is_bookkeeping_file(&file_name) {
            continue;
        }
        if file_name == "apex_manifest.pb" {
            continue;
        }

        let extension = match file_name.rfind('.') {
            Some(idx) if idx > 0 => Some(&file_name[idx..]),
            _ => None,
        };
        match extension {
            None => {
                if rules.disable_container_binary_injection {
                    debug!("container binary layering disabled, skipping {}", rel.display());
                    continue;
                }
            }
            Some(ext) => {
                if !rules.allowed_container_extensions.is_empty()
                    && !rules
                        .allowed_container_extensions
                        .iter()
                        .any(|allowed| allowed == ext)
                {
                    debug!("extension {} not allowed inside containers", ext);
                    continue;
                }
                if rules
                    .denied_container_extensions
                    .iter()
                    .any(|denied| denied == ext)
                {
                    debug!("extension {} denied inside containers", ext);
                    continue;
                }
            }
        }
        if rules
            .protected_container_files
            .iter()
            .any(|protected| protected == &file_name)
        {
            debug!("protected container file, not overwritten: {}", file_name);
            continue;
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(path, &dst).map_err(|e| Error::io(path, e))?;
        layered += 1;
    }
    info!("layered {} files into merged container tree", layered);
    Ok(())
}

/// Layer the supplied container's app packages and return their names
/// for file-mode-table filtering. Cache-tag path segments (`dir@hash`)
/// are stripped so the app lands at its mount location.
pub fn layer_apps(merged: &Path, vendor_src: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(vendor_src).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(vendor_src, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !file_name.ends_with(".apk") {
            continue;
        }
        let rel = path.strip_prefix(vendor_src).unwrap_or(path);
        let rel = strip_cache_tags(rel);
        let dst = merged.join(&rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::copy(path, &dst).map_err(|e| Error::io(path, e))?;
        super::set_mode(&dst, 0o755)?;
        info!("layered app package {} into container", rel.display());
        names.push(file_name);
    }
    Ok(names)
}

/// Drop `@tag` suffixes from path segments.
fn strip_cache_tags(rel: &Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in rel.components() {
        let text = component.as_os_str().to_string_lossy();
        match text.split_once('@') {
            Some((before, _)) if !before.is_empty() => out.push(before),
            _ => out.push(component.as_os_str()),
        }
    }
    out
}

/// Re-sign every app package inside an extracted container. Individual
/// failures are logged and do not abort the repack; the signer already
/// reported the file.
pub fn resign_embedded_apps(extract_dir: &Path, ctx: &ContainerContext) {
    for entry in WalkDir::new(extract_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !path.to_string_lossy().ends_with(".apk") {
            continue;
        }
        if let Err(e) = apps::resign_app(path, &ctx.paths.build_root, ctx.rules, ctx.tools) {
            warn!("embedded app re-sign failed for {}: {}", path.display(), e);
        }
    }
}
