// src/apps.rs

//! Application-package re-signing
//!
//! Grafted app packages carry the vendor's signature, which the build's
//! verifier rejects. Each one is re-signed with a platform key chosen by
//! a keyword routing over the package name; the keys themselves live in
//! the build's security directory and signing is delegated to the
//! external signer.

use crate::config::RuleSet;
use crate::error::{Error, Result};
use crate::tools::Toolchain;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory of platform signing keys inside the build tree.
const SECURITY_KEY_DIR: &str = "build/target/product/security";

/// Default signing key when no routing keyword matches.
const DEFAULT_SIGNING_KEY: &str = "platform";

/// Pick a signing key name for an app package by filename keyword.
pub fn signing_key_for(file_name: &str, rules: &RuleSet) -> String {
    let name = file_name.to_lowercase();

    // Explicit routing table first: identity keyword -> key-file stem.
    for (key, shared_ids) in &rules.shared_user_signing_keys {
        if shared_ids.iter().any(|id| name.contains(&id.to_lowercase())) {
            return key.clone();
        }
    }

    if name.contains("media") {
        "media".to_string()
    } else if ["network", "tethering", "cellbroadcast"]
        .iter()
        .any(|k| name.contains(k))
    {
        "networkstack".to_string()
    } else if name.contains("bluetooth") && rules.rename_keywords.contains_key("bluetooth") {
        "bluetooth".to_string()
    } else {
        DEFAULT_SIGNING_KEY.to_string()
    }
}

/// Absolute path of a named signing keystore.
pub fn signing_key_path(build_root: &Path, key_name: &str) -> PathBuf {
    build_root
        .join(SECURITY_KEY_DIR)
        .join(format!("{}.p12", key_name))
}

/// Re-sign one app package in place and verify the result.
pub fn resign_app(app: &Path, build_root: &Path, rules: &RuleSet, tools: &Toolchain) -> Result<()> {
    let file_name = app
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let key_name = signing_key_for(&file_name, rules);
    let key_path = signing_key_path(build_root, &key_name);
    if !key_path.exists() {
        return Err(Error::KeyMaterial(format!(
            "signing key `{}` not found at {}",
            key_name,
            key_path.display()
        )));
    }

    tools.sign_app(app, &key_path)?;
    info!("signed app package {} with key {}", app.display(), key_name);

    match tools.verify_app(app) {
        Ok(true) => {}
        Ok(false) => warn!("signature verification failed for {}", app.display()),
        Err(e) => warn!("signature verifier unavailable for {}: {}", app.display(), e),
    }
    Ok(())
}
