// src/error.rs

//! Crate-wide error type.
//!
//! Only failures that abort a whole run are surfaced as [`Error`] values
//! (malformed rule sets, missing key material, unusable paths). Per-file
//! failures stay inside the injection pipeline as recorded outcomes and
//! never cross the worker boundary.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rule set missing, unreadable, or malformed. Fatal: no meaningful
    /// partial result is possible without a valid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external build tool exited nonzero or could not be spawned.
    #[error("external tool `{tool}` failed: {message}")]
    Tool { tool: String, message: String },

    /// A container transform stage failed; the original container file
    /// has been restored from its backup.
    #[error("container operation failed for {}: {message}", path.display())]
    Container { path: PathBuf, message: String },

    /// Required signing key material could not be located or generated.
    #[error("signing key material error: {0}")]
    KeyMaterial(String),

    #[error("lock error at {}: {message}", path.display())]
    Lock { path: PathBuf, message: String },
}

impl Error {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
