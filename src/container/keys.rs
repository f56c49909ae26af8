// src/container/keys.rs

//! Container signing-key material
//!
//! Merged containers are signed with the build's own per-identity keys,
//! located through the identity-keyword routing table; the verity public
//! key is extracted on demand when its artifact is missing. Repacked and
//! synthesized containers get a fresh 4096-bit key pair and self-signed
//! certificate generated into a temporary key directory by the external
//! key generator.

use super::ContainerContext;
use crate::error::{Error, Result};
use crate::tools::KEY_GENERATOR;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The four key files a container signature needs.
#[derive(Debug, Clone)]
pub struct KeyBundle {
    /// PKCS#8 DER private key consumed by the container signer.
    pub private_key: PathBuf,
    /// PEM private key consumed by the packager.
    pub private_pem: PathBuf,
    /// Extracted verity public key.
    pub public_key: PathBuf,
    /// X.509 certificate for the outer signature.
    pub certificate: PathBuf,
}

/// Map a routing keyword to the key-file stem it names. A handful of
/// modules publish their keys under an elongated identity.
fn key_stem_for(keyword: &str) -> String {
    match keyword {
        "vndk" => "com.android.vndk.current".to_string(),
        "statsd" => "com.android.os.statsd".to_string(),
        "swcodec" => "com.android.media.swcodec".to_string(),
        k if k.starts_with("tzdata") => "com.android.tzdata".to_string(),
        k => format!("com.android.{}", k),
    }
}

/// Dotted name segments of a container file name, with build-variant
/// suffixes removed.
fn name_segments(file_name: &str) -> Vec<String> {
    file_name
        .replace("_compressed", "")
        .replace("_trimmed", "")
        .split('.')
        .map(|s| s.to_lowercase())
        .collect()
}

/// Locate pre-existing key material for a container via the routing
/// table. Missing verity public keys are extracted from the private key;
/// any other missing file is a configuration-integrity error.
pub fn resolve_existing(file_name: &str, ctx: &ContainerContext) -> Result<KeyBundle> {
    let segments = name_segments(file_name);
    for (keyword, module_dir) in &ctx.rules.container_key_paths {
        if !segments.iter().any(|s| s == &keyword.to_lowercase()) {
            continue;
        }
        let stem = key_stem_for(keyword);
        let module_path = ctx.paths.build_root.join(module_dir);
        let bundle = KeyBundle {
            private_key: module_path.join(format!("{}.pk8", stem)),
            private_pem: module_path.join(format!("{}.pem", stem)),
            public_key: module_path.join(format!("{}.avbpubkey", stem)),
            certificate: module_path.join(format!("{}.x509.pem", stem)),
        };

        if !bundle.public_key.exists() {
            debug!(
                "verity public key missing, extracting to {}",
                bundle.public_key.display()
            );
            ctx.tools
                .extract_public_key(&bundle.private_pem, &bundle.public_key)?;
        }

        for key_file in [
            &bundle.private_key,
            &bundle.private_pem,
            &bundle.public_key,
            &bundle.certificate,
        ] {
            if !key_file.exists() {
                return Err(Error::KeyMaterial(format!(
                    "key file for container {} missing: {}",
                    file_name,
                    key_file.display()
                )));
            }
        }
        info!("resolved signing keys for {} via keyword {}", file_name, keyword);
        return Ok(bundle);
    }
    Err(Error::KeyMaterial(format!(
        "no signing-key routing entry matches container {}",
        file_name
    )))
}

/// Generate a fresh 4096-bit key pair, PKCS#8 form, self-signed
/// certificate and verity public key in a temporary directory. The
/// directory guard must outlive the signing calls.
pub fn generate_fresh(identity: &str, ctx: &ContainerContext) -> Result<(TempDir, KeyBundle)> {
    let key_dir = TempDir::new().map_err(|e| Error::io(Path::new("/tmp"), e))?;
    let bundle = KeyBundle {
        private_key: key_dir.path().join(format!("{}.pk8", identity)),
        private_pem: key_dir.path().join(format!("{}.pem", identity)),
        public_key: key_dir.path().join(format!("{}.avbpubkey", identity)),
        certificate: key_dir.path().join(format!("{}.x509.pem", identity)),
    };

    let pem_args: Vec<OsString> = vec![
        "genpkey".into(),
        "-algorithm".into(),
        "RSA".into(),
        "-out".into(),
        bundle.private_pem.as_os_str().to_os_string(),
        "-pkeyopt".into(),
        "rsa_keygen_bits:4096".into(),
    ];
    ctx.tools.run_checked(KEY_GENERATOR, pem_args)?;

    let pk8_args: Vec<OsString> = vec![
        "pkcs8".into(),
        "-topk8".into(),
        "-inform".into(),
        "PEM".into(),
        "-outform".into(),
        "DER".into(),
        "-in".into(),
        bundle.private_pem.as_os_str().to_os_string(),
        "-out".into(),
        bundle.private_key.as_os_str().to_os_string(),
        "-nocrypt".into(),
    ];
    ctx.tools.run_checked(KEY_GENERATOR, pk8_args)?;

    let cert_args: Vec<OsString> = vec![
        "req".into(),
        "-x509".into(),
        "-key".into(),
        bundle.private_pem.as_os_str().to_os_string(),
        "-out".into(),
        bundle.certificate.as_os_str().to_os_string(),
        "-days".into(),
        "365".into(),
        "-nodes".into(),
        "-subj".into(),
        format!("/CN={}", identity).into(),
    ];
    ctx.tools.run_checked(KEY_GENERATOR, cert_args)?;

    ctx.tools
        .extract_public_key(&bundle.private_pem, &bundle.public_key)?;

    for key_file in [
        &bundle.private_key,
        &bundle.private_pem,
        &bundle.certificate,
        &bundle.public_key,
    ] {
        if !key_file.exists() {
            return Err(Error::KeyMaterial(format!(
                "fresh key generation left {} missing",
                key_file.display()
            )));
        }
    }
    info!("generated fresh key material for {}", identity);
    Ok((key_dir, bundle))
}

/// Security-context file names diverge from key stems for a few modules.
fn file_contexts_name_for(keyword: &str) -> String {
    match keyword {
        "bluetooth" => "com.android.bluetooth.updatable-file_contexts".to_string(),
        "swcodec" => "com.android.media.swcodec-file_contexts".to_string(),
        "statsd" => "com.android.os.statsd-file_contexts".to_string(),
        k if k.starts_with("tzdata") => "com.android.tzdata-file_contexts".to_string(),
        k => format!("com.android.{}-file_contexts", k),
    }
}

/// Locate the build's security-context file for a container, if its
/// identity is routed and the file exists.
pub fn file_contexts_for(file_name: &str, ctx: &ContainerContext) -> Option<PathBuf> {
    let segments = name_segments(file_name);
    for keyword in ctx.rules.container_key_paths.keys() {
        if !segments.iter().any(|s| s == &keyword.to_lowercase()) {
            continue;
        }
        let path = ctx
            .paths
            .build_root
            .join("system/sepolicy/apex")
            .join(file_contexts_name_for(keyword));
        if path.exists() {
            return Some(path);
        }
        return None;
    }
    None
}
