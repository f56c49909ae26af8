// src/container/fsconfig.rs

//! Canned file-mode table generation
//!
//! The container packager consumes a text table assigning owner, group
//! and mode to every path inside the image. Directories get `0755`
//! under the system group; files get `0644`, promoted to `0755` when
//! the extracted copy carries an executable bit. Stale embedded public
//! keys are dropped, and in merge mode app packages that were not
//! explicitly layered are dropped as well.

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Embedded public-key file name; regenerated by the packager, so a
/// stale copy must not survive.
const EMBEDDED_PUBKEY: &str = "apex_pubkey";

/// Generate the file-mode table for an extracted container tree.
///
/// With `app_filter` set (merge mode), app packages whose names are not
/// in the list are removed from the tree and omitted from the table.
pub fn generate_fs_config(
    extract_dir: &Path,
    out_file: &Path,
    app_filter: Option<&[String]>,
) -> Result<()> {
    let mut out = File::create(out_file).map_err(|e| Error::io(out_file, e))?;
    writeln!(out, "/ 1000 1000 0755").map_err(|e| Error::io(out_file, e))?;
    let mut entries = 1usize;

    for entry in WalkDir::new(extract_dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(extract_dir, e.into()))?;
        let path = entry.path();
        let rel = match path.strip_prefix(extract_dir) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let file_name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            writeln!(out, "/{} 0 2000 0755", rel.display()).map_err(|e| Error::io(out_file, e))?;
            entries += 1;
            continue;
        }

        if file_name.contains(EMBEDDED_PUBKEY) {
            debug!("dropping embedded public key {}", rel.display());
            fs::remove_file(path).map_err(|e| Error::io(path, e))?;
            continue;
        }

        if let Some(kept_apps) = app_filter {
            if file_name.ends_with(".apk")
                && !kept_apps.iter().any(|name| path_contains_name(path, name))
            {
                debug!("dropping unlisted app package {}", rel.display());
                fs::remove_file(path).map_err(|e| Error::io(path, e))?;
                continue;
            }
        }

        let mode = if is_executable(path) { "0755" } else { "0644" };
        writeln!(out, "/{} 1000 1000 {}", rel.display(), mode)
            .map_err(|e| Error::io(out_file, e))?;
        entries += 1;
    }

    info!(
        "file-mode table written to {} ({} entries)",
        out_file.display(),
        entries
    );
    Ok(())
}

fn path_contains_name(path: &Path, name: &str) -> bool {
    path.to_string_lossy().contains(name)
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Write a minimal security-context map for containers that have no
/// policy file in the build tree.
pub fn write_default_file_contexts(work_dir: &Path) -> Result<PathBuf> {
    let path = work_dir.join("file_contexts");
    let content = "\
(/.*)?           u:object_r:system_file:s0\n\
/bin(/.*)?       u:object_r:system_file:s0\n\
/lib64(/.*)?     u:object_r:system_lib_file:s0\n\
/etc(/.*)?       u:object_r:system_file:s0\n\
/manifest\\.json  u:object_r:system_file:s0\n";
    fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn set_exec(path: &Path) {
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_modes_follow_executable_bit() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write(&tree.join("bin/monitor"), b"elf");
        set_exec(&tree.join("bin/monitor"));
        write(&tree.join("etc/config"), b"cfg");

        let table = dir.path().join("fs_config");
        generate_fs_config(&tree, &table, None).unwrap();
        let text = fs::read_to_string(&table).unwrap();

        assert!(text.starts_with("/ 1000 1000 0755\n"));
        assert!(text.contains("/bin 0 2000 0755"));
        assert!(text.contains("/bin/monitor 1000 1000 0755"));
        assert!(text.contains("/etc/config 1000 1000 0644"));
    }

    #[test]
    fn test_embedded_pubkey_removed() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write(&tree.join("apex_pubkey"), b"key");
        write(&tree.join("etc/keep"), b"x");

        let table = dir.path().join("fs_config");
        generate_fs_config(&tree, &table, None).unwrap();
        assert!(!tree.join("apex_pubkey").exists());
        let text = fs::read_to_string(&table).unwrap();
        assert!(!text.contains("apex_pubkey"));
        assert!(text.contains("/etc/keep"));
    }

    #[test]
    fn test_app_filter_drops_unlisted_packages() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write(&tree.join("app/Kept/Kept.apk"), b"apk");
        write(&tree.join("app/Dropped/Dropped.apk"), b"apk");

        let table = dir.path().join("fs_config");
        generate_fs_config(&tree, &table, Some(&["Kept.apk".to_string()])).unwrap();
        assert!(tree.join("app/Kept/Kept.apk").exists());
        assert!(!tree.join("app/Dropped/Dropped.apk").exists());
    }

    #[test]
    fn test_no_filter_keeps_all_packages() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("tree");
        write(&tree.join("app/Any/Any.apk"), b"apk");

        let table = dir.path().join("fs_config");
        generate_fs_config(&tree, &table, None).unwrap();
        assert!(tree.join("app/Any/Any.apk").exists());
    }

    #[test]
    fn test_default_file_contexts_written() {
        let dir = TempDir::new().unwrap();
        let path = write_default_file_contexts(dir.path()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("u:object_r:system_file:s0"));
    }
}
