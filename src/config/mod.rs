// src/config/mod.rs

//! Rule-set loading
//!
//! Two JSON documents drive every decision in the pipeline: the pre-graft
//! rules (what an earlier phase already placed into the build) and the
//! post-graft rules (the large keyword/override catalogue). Both are
//! loaded once, validated, and passed by reference through every pipeline
//! call — there is no process-global configuration state.
//!
//! Unknown keys are ignored and absent keys degrade to empty lists or
//! false toggles, so rule documents can be trimmed per device without
//! breaking older tools. A missing or malformed document is fatal.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::info;

/// Top-level output namespaces of the build. `Super` is an alias tree
/// that resolves to `System` for target-path purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Partition {
    System,
    Vendor,
    Product,
    SystemExt,
    Odm,
    Oem,
    Data,
    Super,
}

impl Partition {
    /// The partition whose directory actually receives the file.
    /// `super` images unpack into the system tree.
    pub fn effective(&self) -> Partition {
        match self {
            Partition::Super => Partition::System,
            other => *other,
        }
    }

    /// Partitions that are ignored when filtering object-cache candidates
    /// by partition name.
    pub fn is_unfiltered(&self) -> bool {
        matches!(self, Partition::Super | Partition::System)
    }
}

/// Filesystem roots of one grafting run. Passed explicitly alongside the
/// rule set; nothing in the pipeline reads process-global paths.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Root of the wrapped build checkout (host tools live beneath it).
    pub build_root: std::path::PathBuf,
    /// The build's target output tree that receives grafted files.
    pub target_out: std::path::PathBuf,
    /// Product output directory used by explicit target-path overrides.
    pub product_out: std::path::PathBuf,
}

/// Rules describing what an earlier grafting phase already injected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreRules {
    /// Package names placed into the build by the pre-graft phase.
    #[serde(default)]
    pub injected_packages: Vec<String>,
    /// Phase-specific marker tokens stripped from those names before
    /// comparing them against candidate file names.
    #[serde(default)]
    pub name_markers: Vec<String>,
}

/// The post-graft rule catalogue. Field names mirror the recognized
/// option categories of the rule documents.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_true")]
    pub enable_injection: bool,

    // Global deny/allow lists
    #[serde(default)]
    pub skipped_file_names: Vec<String>,
    #[serde(default)]
    pub skipped_file_endings: Vec<String>,
    #[serde(default)]
    pub allow_only_extensions: Vec<String>,
    #[serde(default)]
    pub skipped_extensions: Vec<String>,
    #[serde(default)]
    pub skipped_path_keywords: Vec<String>,

    // Application-package rules
    #[serde(default)]
    pub skipped_app_keywords: Vec<String>,
    #[serde(default)]
    pub skipped_apps: Vec<String>,
    #[serde(default)]
    pub allowed_app_keywords: Vec<String>,
    #[serde(default)]
    pub disallow_app_injection: bool,
    #[serde(default)]
    pub always_inject_apps: Vec<String>,
    #[serde(default)]
    pub always_inject_app_keywords: Vec<String>,

    // Whitelists evaluated after every deny rule
    #[serde(default)]
    pub always_inject_files: Vec<String>,
    #[serde(default)]
    pub always_inject_path_keywords: Vec<String>,

    // Category toggles
    #[serde(default)]
    pub disable_binary_injection: bool,
    #[serde(default)]
    pub disable_java_library_injection: bool,
    #[serde(default)]
    pub allow_all_java_libraries: bool,
    #[serde(default)]
    pub disable_misc_injection: bool,

    // Shared-library special cases
    #[serde(default)]
    pub inject_missing_shared_libraries: bool,
    #[serde(default)]
    pub skipped_missing_shared_libraries: Vec<String>,
    #[serde(default)]
    pub skipped_missing_shared_library_keywords: Vec<String>,

    // Container rules
    #[serde(default)]
    pub skipped_container_keywords: Vec<String>,
    #[serde(default)]
    pub treat_unlisted_containers_as_etc: bool,
    #[serde(default)]
    pub container_merge_only_keywords: Vec<String>,
    #[serde(default)]
    pub container_etc_keywords: Vec<String>,
    #[serde(default)]
    pub allow_container_merge: bool,
    #[serde(default)]
    pub container_merge_keywords: Vec<String>,
    #[serde(default)]
    pub allow_mixed_containers: bool,
    #[serde(default)]
    pub mixed_container_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub inject_container_files: bool,
    #[serde(default = "default_true")]
    pub inject_container_apps: bool,
    #[serde(default)]
    pub disable_container_binary_injection: bool,
    #[serde(default)]
    pub protected_container_files: Vec<String>,
    #[serde(default)]
    pub allowed_container_extensions: Vec<String>,
    #[serde(default)]
    pub denied_container_extensions: Vec<String>,
    #[serde(default)]
    pub check_vndk_version: bool,
    #[serde(default)]
    pub base_vndk_version: u32,
    #[serde(default)]
    pub replace_verity_keys: bool,

    // Injection routing
    #[serde(default)]
    pub skipped_indirect_extensions: Vec<String>,
    #[serde(default)]
    pub indirect_overrides: HashMap<String, String>,
    #[serde(default)]
    pub direct_overrides: HashMap<String, String>,

    // Isolated-namespace routing
    #[serde(default)]
    pub use_isolated_namespace: bool,
    #[serde(default)]
    pub isolated_namespace_binaries: Vec<String>,
    #[serde(default)]
    pub isolated_namespace_libraries: Vec<String>,
    #[serde(default = "default_namespace")]
    pub synthetic_namespace: String,

    // Signing-key routing
    #[serde(default)]
    pub container_key_paths: HashMap<String, String>,
    #[serde(default)]
    pub base_container_dirs: HashMap<String, String>,
    #[serde(default)]
    pub shared_user_signing_keys: HashMap<String, Vec<String>>,

    // Identity normalization
    #[serde(default = "default_vendor_names")]
    pub vendor_names: Vec<String>,
    #[serde(default)]
    pub rename_keywords: HashMap<String, String>,
    #[serde(default)]
    pub rewrite_app_process32: bool,
}

impl Default for RuleSet {
    fn default() -> Self {
        // An empty JSON object gives every field its serde default.
        serde_json::from_str("{}").expect("empty rule document")
    }
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "graft".to_string()
}

fn default_vendor_names() -> Vec<String> {
    [
        "Google", "Samsung", "Huawei", "Xiaomi", "Oppo", "Vivo", "OnePlus", "Realme", "Sony",
        "Nokia", "Motorola", "Asus", "Lenovo", "Honor", "Fairphone", "Pixel",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RuleSet {
    /// Exact-filename and filename-ending deny lists.
    pub fn is_file_name_allowed(&self, file_name: &str) -> bool {
        if self.skipped_file_names.iter().any(|n| n == file_name) {
            return false;
        }
        !self
            .skipped_file_endings
            .iter()
            .any(|ending| file_name.ends_with(ending.as_str()))
    }

    /// Extension allow list (when non-empty) and general deny list.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        if !self.allow_only_extensions.is_empty()
            && !self.allow_only_extensions.iter().any(|e| e == extension)
        {
            return false;
        }
        !self.skipped_extensions.iter().any(|e| e == extension)
    }

    /// Global path-keyword deny list.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        !self
            .skipped_path_keywords
            .iter()
            .any(|keyword| path.contains(keyword.as_str()))
    }

    /// Whether a container file name matches the merge-eligibility list.
    pub fn matches_merge_keyword(&self, file_name: &str) -> bool {
        self.container_merge_keywords
            .iter()
            .any(|keyword| file_name.contains(keyword.as_str()))
    }

    /// Whether a merged container keeps the full base tree rather than
    /// only the base manifest.
    pub fn matches_mixed_keyword(&self, file_name: &str) -> bool {
        self.allow_mixed_containers
            && self
                .mixed_container_keywords
                .iter()
                .any(|keyword| file_name.contains(keyword.as_str()))
    }
}

/// Load and validate both rule documents.
pub fn load_rules(pre_path: &Path, post_path: &Path) -> Result<(PreRules, RuleSet)> {
    let pre: PreRules = read_json(pre_path)?;
    let post: RuleSet = read_json(post_path)?;
    info!(
        "loaded rule documents: pre ({} packages) from {}, post from {}",
        pre.injected_packages.len(),
        pre_path.display(),
        post_path.display()
    );
    Ok((pre, post))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read rule document {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "malformed rule document {}: {}",
            path.display(),
            e
        ))
    })
}
