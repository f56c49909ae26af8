// src/classify/mod.rs

//! Artifact-to-module-type classification
//!
//! Classification happens in two steps. A base type is derived from the
//! file's extension, content and location; a fixed, ordered chain of
//! override rules then refines it. Each rule is a pure predicate that
//! either proposes a new type or abstains, and the rules are applied
//! left-to-right with last-match-wins semantics. That ordering is part
//! of the contract: deny rules sit early in the chain and the
//! "always allow" rules sit at the end, so an administrator can
//! whitelist a specific file regardless of any other deny list.
//!
//! Classification is re-derived on every call and never fails; an
//! unreadable file degrades to [`ModuleType::Misc`].

use crate::artifact::ArtifactFile;
use crate::config::{PreRules, RuleSet};
use std::fmt;
use tracing::debug;

/// Module type labels driving routing and compatibility rules.
///
/// The string forms double as the object-cache directory names
/// (`obj/SHARED_LIBRARIES/...`), which is why they stay uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Executable,
    JavaLibrary,
    SharedLibrary,
    AppPackage,
    StaticConfig,
    Etc,
    Misc,
    Skipped,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executable => "EXECUTABLES",
            Self::JavaLibrary => "JAVA_LIBRARIES",
            Self::SharedLibrary => "SHARED_LIBRARIES",
            Self::AppPackage => "APPS",
            Self::StaticConfig => "STATIC_CONFIG",
            Self::Etc => "ETC",
            Self::Misc => "MISC",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXECUTABLES" => Some(Self::Executable),
            "JAVA_LIBRARIES" => Some(Self::JavaLibrary),
            "SHARED_LIBRARIES" => Some(Self::SharedLibrary),
            "APPS" => Some(Self::AppPackage),
            "STATIC_CONFIG" => Some(Self::StaticConfig),
            "ETC" => Some(Self::Etc),
            "MISC" => Some(Self::Misc),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Module types whose ELF candidates must agree on word size.
    pub fn is_abi_checked(&self) -> bool {
        matches!(self, Self::SharedLibrary | Self::Executable | Self::Etc)
    }

    /// Module types searched across the whole object cache instead of a
    /// type-keyed subtree.
    pub fn searches_whole_cache(&self) -> bool {
        matches!(self, Self::Misc | Self::StaticConfig)
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of classifying one artifact.
///
/// `baseline` is the pre-override type. Several override rules restore
/// it after a conditional skip, so it travels with the resolved value
/// instead of being recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub resolved: ModuleType,
    pub baseline: ModuleType,
}

impl Classification {
    pub fn is_skipped(&self) -> bool {
        self.resolved == ModuleType::Skipped
    }
}

/// Everything an override rule may consult. Rules never see mutable
/// state; the fold over the rule chain owns the current value.
struct RuleContext<'a> {
    artifact: &'a ArtifactFile,
    /// Basename with build-variant suffixes stripped for containers.
    name: &'a str,
    stem: &'a str,
    baseline: ModuleType,
    rules: &'a RuleSet,
    pre: &'a PreRules,
}

impl RuleContext<'_> {
    fn name_contains_any(&self, keywords: &[String]) -> bool {
        keywords.iter().any(|k| self.name.contains(k.as_str()))
    }

    fn is_container(&self) -> bool {
        self.artifact.is_container()
    }
}

type OverrideRule = for<'a> fn(&RuleContext<'a>) -> Option<ModuleType>;

/// The override chain. Order is semantic and must not be rearranged:
/// deny rules first, category toggles in the middle, "always allow"
/// rules last.
const OVERRIDE_RULES: &[(&str, OverrideRule)] = &[
    ("app-keyword-deny", app_keyword_deny),
    ("app-name-deny", app_name_deny),
    ("app-keyword-allow", app_keyword_allow),
    ("binary-category-toggle", binary_category_toggle),
    ("global-deny-lists", global_deny_lists),
    ("already-injected", already_injected),
    ("missing-shared-library", missing_shared_library),
    ("container-keyword-deny", container_keyword_deny),
    ("container-unlisted-to-etc", container_unlisted_to_etc),
    ("container-etc-keywords", container_etc_keywords),
    ("app-category-toggle", app_category_toggle),
    ("java-category-toggle", java_category_toggle),
    ("java-allow-all", java_allow_all),
    ("misc-category-toggle", misc_category_toggle),
    ("app-always-allow", app_always_allow),
    ("file-always-allow", file_always_allow),
];

/// Classify one artifact against the rule set and the list of packages
/// an earlier phase already placed.
pub fn classify(artifact: &ArtifactFile, rules: &RuleSet, pre: &PreRules) -> Classification {
    let baseline = base_type(artifact);
    let name = if artifact.is_container() {
        artifact.normalized_name()
    } else {
        artifact.file_name().to_string()
    };
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name.clone(),
    };

    let ctx = RuleContext {
        artifact,
        name: &name,
        stem: &stem,
        baseline,
        rules,
        pre,
    };

    let resolved = OVERRIDE_RULES
        .iter()
        .fold(baseline, |current, (rule_name, rule)| match rule(&ctx) {
            Some(proposed) if proposed != current => {
                debug!(
                    "override rule {} -> {} for {}",
                    rule_name,
                    proposed,
                    artifact.path().display()
                );
                proposed
            }
            Some(_) => current,
            None => current,
        });

    Classification { resolved, baseline }
}

/// Derive the base type from extension, content and location.
fn base_type(artifact: &ArtifactFile) -> ModuleType {
    let parent_has_bin = artifact
        .path()
        .parent()
        .map(|p| p.to_string_lossy().contains("bin"))
        .unwrap_or(false);

    match artifact.extension() {
        None if artifact.is_elf() || parent_has_bin => ModuleType::Executable,
        Some(".jar") => ModuleType::JavaLibrary,
        Some(".so") => ModuleType::SharedLibrary,
        Some(".apk") => ModuleType::AppPackage,
        Some(".xml") => ModuleType::StaticConfig,
        _ if artifact.path_contains("/etc/") => ModuleType::Etc,
        _ if artifact.is_container() => ModuleType::Etc,
        _ => ModuleType::Misc,
    }
}

// --- override rules, in chain order ---

fn app_keyword_deny(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::AppPackage
        && ctx.name_contains_any(&ctx.rules.skipped_app_keywords))
    .then_some(ModuleType::Skipped)
}

fn app_name_deny(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::AppPackage
        && ctx
            .rules
            .skipped_apps
            .iter()
            .any(|n| n == ctx.name || n == ctx.stem))
    .then_some(ModuleType::Skipped)
}

fn app_keyword_allow(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::AppPackage
        && ctx.name_contains_any(&ctx.rules.allowed_app_keywords))
    .then_some(ModuleType::AppPackage)
}

fn binary_category_toggle(ctx: &RuleContext) -> Option<ModuleType> {
    (matches!(ctx.baseline, ModuleType::Executable | ModuleType::Etc)
        && ctx.rules.disable_binary_injection)
    .then_some(ModuleType::Skipped)
}

fn global_deny_lists(ctx: &RuleContext) -> Option<ModuleType> {
    let path = ctx.artifact.path().to_string_lossy();
    let extension_denied = match ctx.artifact.extension() {
        Some(ext) => !ctx.rules.is_extension_allowed(ext),
        None => false,
    };
    (!ctx.rules.is_path_allowed(&path)
        || extension_denied
        || !ctx.rules.is_file_name_allowed(ctx.name))
    .then_some(ModuleType::Skipped)
}

fn already_injected(ctx: &RuleContext) -> Option<ModuleType> {
    if !matches!(
        ctx.baseline,
        ModuleType::SharedLibrary | ModuleType::Etc | ModuleType::AppPackage
    ) {
        return None;
    }
    for package in &ctx.pre.injected_packages {
        let mut stripped = package.clone();
        for marker in &ctx.pre.name_markers {
            stripped = stripped.replace(marker.as_str(), "");
        }
        let stripped = stripped.trim();
        if stripped == ctx.name || stripped == ctx.stem {
            debug!(
                "skipping {}: already injected by an earlier phase as {}",
                ctx.artifact.path().display(),
                package
            );
            return Some(ModuleType::Skipped);
        }
    }
    None
}

fn missing_shared_library(ctx: &RuleContext) -> Option<ModuleType> {
    if !ctx.rules.inject_missing_shared_libraries || ctx.artifact.extension() != Some(".so") {
        return None;
    }
    let denied = ctx
        .rules
        .skipped_missing_shared_libraries
        .iter()
        .any(|n| n == ctx.name)
        || ctx.name_contains_any(&ctx.rules.skipped_missing_shared_library_keywords);
    Some(if denied {
        ModuleType::Skipped
    } else {
        ctx.baseline
    })
}

fn container_keyword_deny(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.is_container() && ctx.name_contains_any(&ctx.rules.skipped_container_keywords))
        .then_some(ModuleType::Skipped)
}

/// A container matching none of the merge-only keywords is demoted to a
/// generic grafted object, which routes it past the merge pipeline.
fn container_unlisted_to_etc(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.rules.treat_unlisted_containers_as_etc
        && ctx.is_container()
        && !ctx.name_contains_any(&ctx.rules.container_merge_only_keywords))
    .then_some(ModuleType::Etc)
}

fn container_etc_keywords(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.is_container() && ctx.name_contains_any(&ctx.rules.container_etc_keywords))
        .then_some(ModuleType::Etc)
}

fn app_category_toggle(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::AppPackage && ctx.rules.disallow_app_injection)
        .then_some(ModuleType::Skipped)
}

fn java_category_toggle(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::JavaLibrary && ctx.rules.disable_java_library_injection)
        .then_some(ModuleType::Skipped)
}

fn java_allow_all(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::JavaLibrary
        && !ctx.rules.disable_java_library_injection
        && ctx.rules.allow_all_java_libraries)
    .then_some(ctx.baseline)
}

fn misc_category_toggle(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.baseline == ModuleType::Misc && ctx.rules.disable_misc_injection)
        .then_some(ModuleType::Skipped)
}

fn app_always_allow(ctx: &RuleContext) -> Option<ModuleType> {
    (ctx.artifact.extension() == Some(".apk")
        && (ctx.rules.always_inject_apps.iter().any(|n| n == ctx.name)
            || ctx.name_contains_any(&ctx.rules.always_inject_app_keywords)))
    .then_some(ctx.baseline)
}

fn file_always_allow(ctx: &RuleContext) -> Option<ModuleType> {
    let path = ctx.artifact.path().to_string_lossy();
    (ctx.rules.always_inject_files.iter().any(|n| n == ctx.name)
        || ctx
            .rules
            .always_inject_path_keywords
            .iter()
            .any(|k| path.contains(k.as_str())))
    .then_some(ctx.baseline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn rules(json: &str) -> RuleSet {
        serde_json::from_str(json).unwrap()
    }

    fn pre() -> PreRules {
        PreRules::default()
    }

    fn artifact(dir: &TempDir, rel: &str) -> ArtifactFile {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"content").unwrap();
        ArtifactFile::inspect(&path)
    }

    fn elf_artifact(dir: &TempDir, rel: &str, class: u8) -> ArtifactFile {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut bytes = vec![0x7f, b'E', b'L', b'F', class];
        bytes.extend_from_slice(&[0u8; 11]);
        fs::write(&path, bytes).unwrap();
        ArtifactFile::inspect(&path)
    }

    // ===================
    // Base types
    // ===================

    #[test]
    fn test_base_types_by_extension() {
        let dir = TempDir::new().unwrap();
        let rules = rules("{}");
        let cases = [
            ("system/framework/services.jar", ModuleType::JavaLibrary),
            ("system/lib64/libfoo.so", ModuleType::SharedLibrary),
            ("system/app/Dialer/Dialer.apk", ModuleType::AppPackage),
            ("vendor/etc/permissions/platform.xml", ModuleType::StaticConfig),
            ("system/etc/hosts.conf", ModuleType::Etc),
            ("system/apex/com.android.media.apex", ModuleType::Etc),
            ("system/fonts/Roboto.ttf", ModuleType::Misc),
        ];
        for (rel, expected) in cases {
            let c = classify(&artifact(&dir, rel), &rules, &pre());
            assert_eq!(c.resolved, expected, "for {}", rel);
            assert_eq!(c.baseline, expected);
        }
    }

    #[test]
    fn test_base_type_executable_from_elf_content() {
        let dir = TempDir::new().unwrap();
        let c = classify(&elf_artifact(&dir, "system/toybox", 2), &rules("{}"), &pre());
        assert_eq!(c.resolved, ModuleType::Executable);
    }

    #[test]
    fn test_base_type_executable_from_bin_directory() {
        let dir = TempDir::new().unwrap();
        let c = classify(&artifact(&dir, "system/bin/monitor"), &rules("{}"), &pre());
        assert_eq!(c.resolved, ModuleType::Executable);
        let c = classify(&artifact(&dir, "vendor/xbin/tcpdump"), &rules("{}"), &pre());
        assert_eq!(c.resolved, ModuleType::Executable);
    }

    #[test]
    fn test_unreadable_file_degrades_to_misc() {
        let a = ArtifactFile::inspect(Path::new("/no/such/file.dat"));
        let c = classify(&a, &rules("{}"), &pre());
        assert_eq!(c.resolved, ModuleType::Misc);
    }

    // ===================
    // Deny rules
    // ===================

    #[test]
    fn test_path_keyword_deny() {
        let dir = TempDir::new().unwrap();
        let rules = rules(r#"{"skipped_path_keywords": ["lib64"]}"#);
        let c = classify(&artifact(&dir, "system/lib64/libtest.so"), &rules, &pre());
        assert!(c.is_skipped());
        assert_eq!(c.baseline, ModuleType::SharedLibrary);
    }

    #[test]
    fn test_extension_deny() {
        let dir = TempDir::new().unwrap();
        let rules = rules(r#"{"skipped_extensions": [".odex"]}"#);
        let c = classify(&artifact(&dir, "system/framework/boot.odex"), &rules, &pre());
        assert!(c.is_skipped());
    }

    #[test]
    fn test_file_name_deny() {
        let dir = TempDir::new().unwrap();
        let rules = rules(r#"{"skipped_file_names": ["build.prop"]}"#);
        let c = classify(&artifact(&dir, "system/build.prop"), &rules, &pre());
        assert!(c.is_skipped());
    }

    #[test]
    fn test_app_keyword_deny_and_allow_restore() {
        let dir = TempDir::new().unwrap();
        let denied = rules(r#"{"skipped_app_keywords": ["Stub"]}"#);
        let c = classify(&artifact(&dir, "system/app/MusicStub/MusicStub.apk"), &denied, &pre());
        assert!(c.is_skipped());

        // An allow keyword later in the chain restores the baseline.
        let restored = rules(
            r#"{"skipped_app_keywords": ["Stub"], "allowed_app_keywords": ["Music"]}"#,
        );
        let c = classify(
            &artifact(&dir, "system/app/MusicStub2/MusicStub.apk"),
            &restored,
            &pre(),
        );
        assert_eq!(c.resolved, ModuleType::AppPackage);
    }

    #[test]
    fn test_category_toggles() {
        let dir = TempDir::new().unwrap();
        let c = classify(
            &artifact(&dir, "system/bin/monitor"),
            &rules(r#"{"disable_binary_injection": true}"#),
            &pre(),
        );
        assert!(c.is_skipped());

        let c = classify(
            &artifact(&dir, "system/framework/services.jar"),
            &rules(r#"{"disable_java_library_injection": true}"#),
            &pre(),
        );
        assert!(c.is_skipped());

        let c = classify(
            &artifact(&dir, "system/fonts/Roboto.ttf"),
            &rules(r#"{"disable_misc_injection": true}"#),
            &pre(),
        );
        assert!(c.is_skipped());

        let c = classify(
            &artifact(&dir, "system/app/Dialer/Dialer.apk"),
            &rules(r#"{"disallow_app_injection": true}"#),
            &pre(),
        );
        assert!(c.is_skipped());
    }

    // ===================
    // Always-allow overrides
    // ===================

    #[test]
    fn test_always_allow_beats_every_deny() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"{
                "skipped_path_keywords": ["lib64"],
                "skipped_file_names": ["libtest.so"],
                "always_inject_files": ["libtest.so"]
            }"#,
        );
        let c = classify(&artifact(&dir, "system/lib64/libtest.so"), &rules, &pre());
        assert_eq!(c.resolved, ModuleType::SharedLibrary);
    }

    #[test]
    fn test_app_always_allow_beats_app_toggle() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"{"disallow_app_injection": true, "always_inject_app_keywords": ["Dialer"]}"#,
        );
        let c = classify(&artifact(&dir, "system/app/Dialer/Dialer.apk"), &rules, &pre());
        assert_eq!(c.resolved, ModuleType::AppPackage);
    }

    // ===================
    // Container rules
    // ===================

    #[test]
    fn test_container_keyword_deny_then_unlisted_etc() {
        let dir = TempDir::new().unwrap();
        // Denied by keyword, then resurrected as a generic object because
        // it matches none of the merge-only keywords.
        let rules = rules(
            r#"{
                "skipped_container_keywords": ["vndk"],
                "treat_unlisted_containers_as_etc": true,
                "container_merge_only_keywords": ["media", "tzdata"]
            }"#,
        );
        let c = classify(
            &artifact(&dir, "system/apex/com.android.vndk.current.apex"),
            &rules,
            &pre(),
        );
        assert_eq!(c.resolved, ModuleType::Etc);
    }

    #[test]
    fn test_container_variant_suffix_ignored_by_keywords() {
        let dir = TempDir::new().unwrap();
        let rules = rules(r#"{"skipped_container_keywords": ["tzdata.apex"]}"#);
        let c = classify(
            &artifact(&dir, "system/apex/com.android.tzdata_compressed.apex"),
            &rules,
            &pre(),
        );
        assert!(c.is_skipped());
    }

    // ===================
    // Already-injected rule
    // ===================

    #[test]
    fn test_already_injected_skips_with_marker_stripping() {
        let dir = TempDir::new().unwrap();
        let pre = PreRules {
            injected_packages: vec!["PHASE1 libfoo.so".to_string()],
            name_markers: vec!["PHASE1".to_string()],
        };
        let c = classify(&artifact(&dir, "system/lib64/libfoo.so"), &rules("{}"), &pre);
        assert!(c.is_skipped());

        // Executables are outside the rule's scope.
        let c = classify(&elf_artifact(&dir, "system/bin/libfoo", 2), &rules("{}"), &pre);
        assert_eq!(c.resolved, ModuleType::Executable);
    }

    // ===================
    // Missing-shared-library rule
    // ===================

    #[test]
    fn test_missing_shared_library_restores_after_path_deny() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"{
                "skipped_path_keywords": ["lib64"],
                "inject_missing_shared_libraries": true
            }"#,
        );
        let c = classify(&artifact(&dir, "system/lib64/libmissing.so"), &rules, &pre());
        assert_eq!(c.resolved, ModuleType::SharedLibrary);
    }

    #[test]
    fn test_missing_shared_library_deny_list_still_wins() {
        let dir = TempDir::new().unwrap();
        let rules = rules(
            r#"{
                "inject_missing_shared_libraries": true,
                "skipped_missing_shared_library_keywords": ["hw"]
            }"#,
        );
        let c = classify(&artifact(&dir, "vendor/lib64/libhwctl.so"), &rules, &pre());
        assert!(c.is_skipped());
    }

    // ===================
    // Determinism
    // ===================

    #[test]
    fn test_classification_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let rules = rules(r#"{"skipped_path_keywords": ["odm"]}"#);
        let a = artifact(&dir, "system/lib64/libstable.so");
        let first = classify(&a, &rules, &pre());
        for _ in 0..5 {
            // Interleave unrelated classifications; the result must not move.
            classify(&artifact(&dir, "odm/lib/libother.so"), &rules, &pre());
            assert_eq!(classify(&a, &rules, &pre()), first);
        }
    }

    #[test]
    fn test_module_type_parse_round_trip() {
        for module_type in [
            ModuleType::Executable,
            ModuleType::JavaLibrary,
            ModuleType::SharedLibrary,
            ModuleType::AppPackage,
            ModuleType::StaticConfig,
            ModuleType::Etc,
            ModuleType::Misc,
            ModuleType::Skipped,
        ] {
            assert_eq!(ModuleType::parse(module_type.as_str()), Some(module_type));
        }
        assert_eq!(ModuleType::parse("KERNEL"), None);
    }
}
