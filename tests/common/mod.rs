// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! Builds a supplied-artifact tree and a fake build output tree inside
//! one TempDir. Keep the returned fixture alive for the duration of the
//! test to prevent cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use treegraft::{BuildPaths, PreRules, RuleSet, Toolchain};

pub struct GraftFixture {
    pub dir: TempDir,
    pub source_root: PathBuf,
    pub paths: BuildPaths,
    pub tools: Toolchain,
    pub pre: PreRules,
}

impl GraftFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source_root = dir.path().join("supplied");
        let target_out = dir.path().join("out/target/product/device");
        fs::create_dir_all(&source_root).unwrap();
        fs::create_dir_all(target_out.join("obj")).unwrap();
        let paths = BuildPaths {
            build_root: dir.path().join("build"),
            target_out: target_out.clone(),
            product_out: target_out,
        };
        let tools = Toolchain::new(&paths.build_root);
        Self {
            source_root,
            paths,
            tools,
            pre: PreRules::default(),
            dir,
        }
    }

    /// Write a supplied artifact under a partition-relative path.
    pub fn supplied(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.source_root.join(rel);
        write_file(&path, content);
        path
    }

    /// Write a minimal ELF file under the supplied tree.
    /// `class` is 1 for 32-bit, 2 for 64-bit.
    pub fn supplied_elf(&self, rel: &str, class: u8) -> PathBuf {
        let path = self.source_root.join(rel);
        write_elf(&path, class);
        path
    }

    /// Write a file into the build output tree.
    pub fn target_file(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.paths.target_out.join(rel);
        write_file(&path, content);
        path
    }

    /// Write a minimal ELF file into the build output tree.
    pub fn target_elf(&self, rel: &str, class: u8) -> PathBuf {
        let path = self.paths.target_out.join(rel);
        write_elf(&path, class);
        path
    }
}

pub fn rules(json: &str) -> RuleSet {
    serde_json::from_str(json).unwrap()
}

pub fn write_file(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn write_elf(path: &Path, class: u8) {
    let mut bytes = vec![0x7f, b'E', b'L', b'F', class];
    bytes.extend_from_slice(&[0u8; 27]);
    write_file(path, &bytes);
}

/// Snapshot of every regular file under a directory with its content
/// hash, for byte-identity assertions.
pub fn tree_snapshot(root: &Path) -> Vec<(PathBuf, String)> {
    let mut entries = Vec::new();
    for entry in walkdir_files(root) {
        let digest = treegraft::hash::sha256_file(&entry).unwrap();
        entries.push((entry, digest));
    }
    entries.sort();
    entries
}

fn walkdir_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if !root.exists() {
        return files;
    }
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()) {
            let path = entry.path();
            let file_type = entry.file_type().unwrap();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files
}
