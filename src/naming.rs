// src/naming.rs

//! Identity-name normalization
//!
//! Vendor firmware names artifacts with vendor-specific infixes
//! (`com.google.android.media.apex` vs. the build's
//! `com.android.media.apex`) and generation-specific tokens
//! (`tzdata5`, `bluetooth` renamed to `btservices`). Matching against
//! the build's own artifacts requires stripping or rewriting these
//! tokens first.

use crate::config::RuleSet;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static VENDOR_INFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^com\.([a-z0-9]+)\.android\..*").unwrap());

static TZDATA_GENERATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"tzdata\d+").unwrap());

/// Extract the vendor infix from a `com.<vendor>.android.*` name.
pub fn vendor_infix(file_name: &str) -> Option<String> {
    VENDOR_INFIX
        .captures(file_name)
        .map(|caps| caps[1].to_string())
}

/// The dotted vendor tokens to strip from a file name: every configured
/// vendor name in lowercase and capitalized form, plus whatever infix the
/// name itself carries.
fn vendor_tokens(rules: &RuleSet, file_name: &str) -> Vec<String> {
    let mut names: Vec<String> = rules.vendor_names.clone();
    if let Some(infix) = vendor_infix(file_name) {
        names.push(infix);
    }

    let mut tokens = Vec::new();
    for name in names {
        let name = name.trim_matches('.');
        if name.is_empty() {
            continue;
        }
        tokens.push(format!(".{}", name.to_lowercase()));
        tokens.push(format!(".{}", capitalize(name)));
    }
    tokens.sort();
    tokens.dedup();
    tokens
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Strip vendor tokens from a bare file name.
pub fn strip_vendor_tokens(rules: &RuleSet, file_name: &str) -> String {
    let mut stripped = file_name.to_string();
    for token in vendor_tokens(rules, file_name) {
        stripped = stripped.replace(&token, "");
    }
    if stripped != file_name {
        debug!("vendor tokens stripped: {} -> {}", file_name, stripped);
    }
    stripped
}

/// Strip vendor tokens from the final component of a path, leaving the
/// directory part untouched.
pub fn strip_vendor_tokens_from_path(rules: &RuleSet, path: &Path) -> PathBuf {
    let file_name = match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => return path.to_path_buf(),
    };
    let stripped = strip_vendor_tokens(rules, &file_name);
    match path.parent() {
        Some(parent) => parent.join(stripped),
        None => PathBuf::from(stripped),
    }
}

/// Collapse generation counters and apply the configured rename map.
/// `tzdata4.apex` becomes `tzdata.apex`; a `bluetooth` container becomes
/// `btservices` on build generations that renamed the module.
pub fn canonical_file_name(rules: &RuleSet, file_name: &str) -> String {
    let mut canonical = TZDATA_GENERATION.replace_all(file_name, "tzdata").to_string();
    for (from, to) in &rules.rename_keywords {
        if canonical.contains(from.as_str()) {
            canonical = canonical.replace(from.as_str(), to.as_str());
        }
    }
    canonical
}
