// src/lib.rs

//! Treegraft
//!
//! Grafts externally produced binary artifacts (executables, shared
//! libraries, Java archives, application packages and signed container
//! bundles) into the intermediate output tree of a pre-existing OS
//! build, so the subsequent packaging step produces an image carrying
//! the grafted artifacts.
//!
//! # Architecture
//!
//! - Rule-driven: every decision consults an immutable rule set loaded
//!   once per run and passed explicitly through the pipeline
//! - Classify → match → inject: a pure classifier labels each file, an
//!   object-cache matcher finds substitution targets, and a per-file
//!   strategy engine performs direct, indirect or fallback injection
//! - Containers transform before placement: extract, optionally merge
//!   with the base build's container, repackage, sign
//! - At-most-once: a per-artifact lock plus completion marker makes runs
//!   idempotent and crash-resumable

pub mod apps;
pub mod artifact;
pub mod classify;
pub mod config;
pub mod container;
mod error;
pub mod hash;
pub mod inject;
pub mod matcher;
pub mod naming;
pub mod orchestrator;
pub mod tools;

pub use artifact::{ArtifactFile, WordSize};
pub use classify::{classify, Classification, ModuleType};
pub use config::{load_rules, BuildPaths, Partition, PreRules, RuleSet};
pub use error::{Error, Result};
pub use inject::{compute_target, DirectRecord, IndirectRecord, InjectionEngine, Outcome};
pub use matcher::find_candidates;
pub use orchestrator::{Orchestrator, PartitionReport, RunReport};
pub use tools::Toolchain;
