// src/tools.rs

//! External build-tool invocation
//!
//! Every tool the pipeline drives (container extractor, container
//! packager, manifest converter, verity key extractor, package signer,
//! key generator) is an external program. Tools shipped with the build
//! are looked up under its host-tool directories, everything else on
//! `PATH`. Invocation is synchronous with captured output; success is
//! exit code zero, and any other result is a recoverable per-operation
//! failure for the caller to handle.

use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Host-tool directories inside the build tree, in probe order.
const HOST_TOOL_DIRS: [&str; 2] = ["out/soong/host/linux-x86/bin", "out/host/linux-x86/bin"];

/// Well-known tool names.
pub const CONTAINER_EXTRACTOR: &str = "deapexer";
pub const CONTAINER_PACKAGER: &str = "apexer";
pub const MANIFEST_CONVERTER: &str = "conv_apex_manifest";
pub const VERITY_KEY_TOOL: &str = "avbtool";
pub const APP_SIGNER: &str = "apksigner";
pub const KEY_GENERATOR: &str = "openssl";

/// Relative path of the container signer jar inside the build tree.
const CONTAINER_SIGNER_JAR: &str = "out/host/linux-x86/framework/signapk.jar";
const CONTAINER_SIGNER_LIBS: &str = "out/host/linux-x86/lib64";

/// Captured result of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Condensed diagnostic for error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Locator and runner for the external build toolchain.
#[derive(Debug, Clone)]
pub struct Toolchain {
    build_root: PathBuf,
}

impl Toolchain {
    pub fn new(build_root: &Path) -> Self {
        Self {
            build_root: build_root.to_path_buf(),
        }
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Locate a tool in the build's host-tool directories, falling back
    /// to `PATH`.
    pub fn locate(&self, name: &str) -> Result<PathBuf> {
        for dir in HOST_TOOL_DIRS {
            let candidate = self.build_root.join(dir).join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        which::which(name).map_err(|_| Error::Tool {
            tool: name.to_string(),
            message: "not found in build host-tool directories or on PATH".to_string(),
        })
    }

    /// Run a located tool synchronously, capturing output.
    pub fn run<I, S>(&self, program: &Path, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("running tool: {}", program.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.build_root)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Tool {
                tool: program.display().to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run a located tool with additional environment variables.
    pub fn run_env<I, S>(
        &self,
        program: &Path,
        args: I,
        envs: &[(&str, String)],
    ) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        debug!("running tool with env: {}", program.display());
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.build_root)
            .stdin(Stdio::null());
        for (key, value) in envs {
            command.env(key, value);
        }
        let output = command.output().map_err(|e| Error::Tool {
            tool: program.display().to_string(),
            message: format!("failed to spawn: {}", e),
        })?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run a named tool; nonzero exit becomes an `Error::Tool`.
    pub fn run_checked<I, S>(&self, name: &str, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = self.locate(name)?;
        let output = self.run(&program, args)?;
        if output.success {
            Ok(output)
        } else {
            Err(Error::Tool {
                tool: name.to_string(),
                message: output.diagnostic(),
            })
        }
    }

    /// Run a named tool, retrying exactly once on failure. Used for the
    /// two historically flaky calls: container extraction and manifest
    /// conversion.
    pub fn run_retry_once<I, S>(&self, name: &str, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S> + Clone,
        S: AsRef<OsStr>,
    {
        match self.run_checked(name, args.clone()) {
            Ok(output) => Ok(output),
            Err(first) => {
                warn!("{} failed, retrying once: {}", name, first);
                self.run_checked(name, args)
            }
        }
    }

    // --- fixed argument templates ---

    /// Extract a container image into a directory.
    pub fn extract_container(&self, container: &Path, out_dir: &Path) -> Result<()> {
        self.run_retry_once(
            CONTAINER_EXTRACTOR,
            [
                OsStr::new("extract"),
                container.as_os_str(),
                out_dir.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Decompress a compressed container into its plain form.
    pub fn decompress_container(&self, compressed: &Path, out_file: &Path) -> Result<()> {
        self.run_retry_once(
            CONTAINER_EXTRACTOR,
            [
                OsStr::new("decompress"),
                OsStr::new("--input"),
                compressed.as_os_str(),
                OsStr::new("--output"),
                out_file.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Convert a JSON container manifest to the binary manifest format.
    pub fn convert_manifest(&self, json_manifest: &Path, out_file: &Path) -> Result<()> {
        self.run_retry_once(
            MANIFEST_CONVERTER,
            [
                OsStr::new("proto"),
                OsStr::new("-o"),
                out_file.as_os_str(),
                json_manifest.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Extract the verity public key from a private key.
    pub fn extract_public_key(&self, private_key: &Path, out_file: &Path) -> Result<()> {
        self.run_checked(
            VERITY_KEY_TOOL,
            [
                OsStr::new("extract_public_key"),
                OsStr::new("--key"),
                private_key.as_os_str(),
                OsStr::new("--output"),
                out_file.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Repackage an extracted container tree into a container image.
    #[allow(clippy::too_many_arguments)]
    pub fn package_container(
        &self,
        extract_dir: &Path,
        out_file: &Path,
        private_pem: &Path,
        public_key: &Path,
        file_contexts: &Path,
        fs_config: &Path,
    ) -> Result<()> {
        let tool_path = format!(
            "{}:{}",
            self.build_root.join(HOST_TOOL_DIRS[1]).display(),
            self.build_root.join(HOST_TOOL_DIRS[0]).display()
        );
        let args: Vec<OsString> = vec![
            "--verbose".into(),
            format!("--key={}", private_pem.display()).into(),
            format!("--pubkey={}", public_key.display()).into(),
            format!("--apexer_tool_path={}", tool_path).into(),
            format!("--file_contexts={}", file_contexts.display()).into(),
            format!("--canned_fs_config={}", fs_config.display()).into(),
            "--include_build_info".into(),
            "--force".into(),
            extract_dir.as_os_str().to_os_string(),
            out_file.as_os_str().to_os_string(),
        ];
        self.run_checked(CONTAINER_PACKAGER, args)?;
        Ok(())
    }

    /// Sign an application package in place with a keystore.
    pub fn sign_app(&self, app: &Path, keystore: &Path) -> Result<()> {
        self.run_checked(
            APP_SIGNER,
            [
                OsStr::new("sign"),
                OsStr::new("--ks"),
                keystore.as_os_str(),
                OsStr::new("--ks-pass"),
                OsStr::new("pass:"),
                OsStr::new("--v4-signing-enabled"),
                OsStr::new("false"),
                OsStr::new("--in"),
                app.as_os_str(),
                OsStr::new("--out"),
                app.as_os_str(),
            ],
        )?;
        Ok(())
    }

    /// Verify an application package's signature via the external
    /// verifier. Failures are reported, not fatal.
    pub fn verify_app(&self, app: &Path) -> Result<bool> {
        let program = self.locate(APP_SIGNER)?;
        let output = self.run(&program, [OsStr::new("verify"), app.as_os_str()])?;
        Ok(output.success)
    }

    /// Sign a container image with the build's container signer.
    pub fn sign_container(
        &self,
        container: &Path,
        certificate: &Path,
        private_key: &Path,
    ) -> Result<()> {
        let jar = self.build_root.join(CONTAINER_SIGNER_JAR);
        if !jar.exists() {
            return Err(Error::Tool {
                tool: "signapk".to_string(),
                message: format!("signer jar not found at {}", jar.display()),
            });
        }
        let signed = container.with_extension("signed");
        let java = which::which("java").map_err(|_| Error::Tool {
            tool: "java".to_string(),
            message: "java runtime not found on PATH".to_string(),
        })?;
        let args: Vec<OsString> = vec![
            format!(
                "-Djava.library.path={}",
                self.build_root.join(CONTAINER_SIGNER_LIBS).display()
            )
            .into(),
            "-jar".into(),
            jar.as_os_str().to_os_string(),
            "--min-sdk-version".into(),
            "28".into(),
            "-a".into(),
            "4096".into(),
            certificate.as_os_str().to_os_string(),
            private_key.as_os_str().to_os_string(),
            container.as_os_str().to_os_string(),
            signed.as_os_str().to_os_string(),
        ];
        let output = self.run(&java, args)?;
        if !output.success {
            let _ = std::fs::remove_file(&signed);
            return Err(Error::Tool {
                tool: "signapk".to_string(),
                message: output.diagnostic(),
            });
        }
        std::fs::rename(&signed, container).map_err(|e| Error::io(container, e))?;
        Ok(())
    }
}
