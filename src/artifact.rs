// src/artifact.rs

//! Candidate file inspection
//!
//! An [`ArtifactFile`] is a source path plus the attributes every later
//! pipeline stage keys on: extension, basename, ELF-ness, word size and
//! whether the file is a signed container bundle. Attributes are derived
//! once at inspection time; the struct is immutable afterwards.

use goblin::elf::header::{EI_CLASS, ELFCLASS32, ELFCLASS64, ELFMAG};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extensions identifying a signed container bundle. The second
/// entry is the compressed wrapper around the first.
pub const CONTAINER_EXTENSIONS: [&str; 2] = [".apex", ".capex"];

/// ELF word size read from the identification header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}

impl WordSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bits32 => "32-bit",
            Self::Bits64 => "64-bit",
        }
    }
}

/// A single file eligible for grafting, with derived attributes.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    path: PathBuf,
    file_name: String,
    stem: String,
    /// Extension including the leading dot (`".so"`), `None` for bare names.
    extension: Option<String>,
    is_elf: bool,
    word_size: Option<WordSize>,
}

impl ArtifactFile {
    /// Inspect a file on disk. Never fails: an unreadable file simply
    /// carries no binary attributes and degrades to the generic paths
    /// through the classifier.
    pub fn inspect(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().trim().to_string())
            .unwrap_or_default();
        let (stem, extension) = split_name(&file_name);
        let word_size = probe_word_size(path);

        Self {
            path: path.to_path_buf(),
            file_name,
            stem,
            extension,
            is_elf: word_size.is_some(),
            word_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Basename without its extension.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn is_elf(&self) -> bool {
        self.is_elf
    }

    pub fn word_size(&self) -> Option<WordSize> {
        self.word_size
    }

    pub fn is_container(&self) -> bool {
        matches!(self.extension(), Some(ext) if CONTAINER_EXTENSIONS.contains(&ext))
    }

    /// Basename with build-variant suffixes stripped. Container files come
    /// out of the build with `_compressed`/`_trimmed` markers that are not
    /// part of their identity.
    pub fn normalized_name(&self) -> String {
        self.file_name
            .replace("_compressed", "")
            .replace("_trimmed", "")
    }

    /// True when the path string contains the given keyword.
    pub fn path_contains(&self, keyword: &str) -> bool {
        self.path.to_string_lossy().contains(keyword)
    }
}

/// Split a basename into (stem, extension-with-dot).
fn split_name(file_name: &str) -> (String, Option<String>) {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (
            file_name[..idx].to_string(),
            Some(file_name[idx..].to_string()),
        ),
        _ => (file_name.to_string(), None),
    }
}

/// Read the ELF identification bytes and classify the word size.
///
/// Returns `None` for non-ELF content, short files and unreadable files:
/// architecture checks treat those as "unknown" and refuse to match them.
pub fn probe_word_size(path: &Path) -> Option<WordSize> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("word-size probe: cannot open {}: {}", path.display(), e);
            return None;
        }
    };
    let mut ident = [0u8; 5];
    if file.read_exact(&mut ident).is_err() {
        return None;
    }
    if ident[..4] != ELFMAG[..] {
        return None;
    }
    match ident[EI_CLASS] {
        ELFCLASS32 => Some(WordSize::Bits32),
        ELFCLASS64 => Some(WordSize::Bits64),
        _ => None,
    }
}

/// Check whether a file starts with the ELF magic.
pub fn is_elf_binary(path: &Path) -> bool {
    probe_word_size(path).is_some()
}
