// tests/grafting.rs

//! End-to-end grafting runs over a fake build output tree.
//!
//! Container transforms need the external build toolchain, so these
//! scenarios stick to plain files, libraries and executables.

mod common;

use common::{rules, tree_snapshot, GraftFixture};
use std::fs;
use treegraft::Orchestrator;

#[test]
fn direct_injection_lands_source_content() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    let source = f.supplied_elf("system/lib64/libfoo.so", 2);

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.direct_count(), 1);
    assert_eq!(report.indirect_count(), 0);
    assert_eq!(report.error_count(), 0);

    let target = f.paths.target_out.join("system/lib64/libfoo.so");
    assert_eq!(
        treegraft::hash::sha256_file(&target).unwrap(),
        treegraft::hash::sha256_file(&source).unwrap()
    );
    // The recorded hash matches the placed content.
    assert_eq!(
        report.partitions[0].direct[0].content_sha256,
        treegraft::hash::sha256_file(&target).unwrap()
    );
}

#[test]
fn occupied_target_routes_through_object_cache() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    // 64-bit source; a 32-bit namesake occupies the canonical slot; a
    // 64-bit original sits in the object cache.
    let source = f.supplied_elf("system/lib64/libfoo.so", 2);
    let occupied = f.target_elf("system/lib64/libfoo.so", 1);
    let cache_64 = f.target_elf("obj/SHARED_LIBRARIES/libfoo_intermediates/libfoo.so", 2);

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.indirect_count(), 1);
    assert_eq!(report.direct_count(), 0);
    // The matched original carries the source content now.
    assert_eq!(
        treegraft::hash::sha256_file(&cache_64).unwrap(),
        treegraft::hash::sha256_file(&source).unwrap()
    );
    // The 32-bit occupant is untouched.
    assert_eq!(fs::read(&occupied).unwrap()[4], 1);
}

#[test]
fn denied_artifact_leaves_target_tree_untouched() {
    let f = GraftFixture::new();
    let rules = rules(r#"{"skipped_path_keywords": ["libtest"]}"#);
    f.supplied_elf("system/lib64/libtest.so", 2);
    f.target_file("system/etc/existing.conf", b"keep");

    let before = tree_snapshot(&f.paths.target_out);
    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();
    let after = tree_snapshot(&f.paths.target_out);

    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.direct_count() + report.indirect_count(), 0);
    assert_eq!(before, after);
}

#[test]
fn unmatched_original_is_aggregated_not_fatal() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    f.supplied_elf("system/lib64/libnowhere.so", 2);
    f.target_elf("system/lib64/libnowhere.so", 2);
    // A second, healthy artifact in the same partition still lands.
    f.supplied_elf("system/lib64/libok.so", 2);

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.error_count(), 1);
    assert!(report.all_errors()[0].starts_with("No matching original"));
    assert_eq!(report.direct_count(), 1);
}

#[test]
fn multiple_cache_originals_all_overwritten() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    let source = f.supplied_elf("system/lib64/libmulti.so", 2);
    f.target_elf("system/lib64/libmulti.so", 2);
    let first = f.target_elf("obj/SHARED_LIBRARIES/libmulti_intermediates/libmulti.so", 2);
    let second = f.target_elf(
        "obj/SHARED_LIBRARIES/libmulti_shim_intermediates/libmulti.so",
        2,
    );

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.indirect_count(), 1);
    let record = &report.partitions[0].indirect[0];
    assert_eq!(record.targets.len(), 2);
    let expected = treegraft::hash::sha256_file(&source).unwrap();
    assert_eq!(treegraft::hash::sha256_file(&first).unwrap(), expected);
    assert_eq!(treegraft::hash::sha256_file(&second).unwrap(), expected);
}

#[test]
fn partitions_process_independently() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    f.supplied_elf("system/lib64/libsys.so", 2);
    f.supplied_elf("vendor/lib64/libven.so", 2);
    f.supplied("product/etc/overlay.conf", b"cfg");

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.partitions.len(), 3);
    assert_eq!(report.direct_count(), 3);
    assert!(f.paths.target_out.join("system/lib64/libsys.so").exists());
    assert!(f.paths.target_out.join("vendor/lib64/libven.so").exists());
    assert!(f.paths.target_out.join("product/etc/overlay.conf").exists());
}

#[test]
fn non_partition_directories_are_ignored() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    f.supplied_elf("system/lib64/libsys.so", 2);
    f.supplied("META-INF/notes.txt", b"x");

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();
    assert_eq!(report.partitions.len(), 1);
    assert!(!f.paths.target_out.join("META-INF/notes.txt").exists());
}

#[test]
fn missing_source_tree_is_fatal() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    let missing = f.dir.path().join("nowhere");
    let result = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &missing).run();
    assert!(matches!(result, Err(treegraft::Error::Config(_))));
}

#[test]
fn stats_record_appended_per_run() {
    let f = GraftFixture::new();
    let rules = rules("{}");
    f.supplied_elf("system/lib64/libstat.so", 2);
    let stats_path = f.dir.path().join("stats/results.json");

    Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .with_stats_path(&stats_path)
        .run()
        .unwrap();

    let records: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&stats_path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["partition_files_injected"], 1);
    assert_eq!(records[0]["errors"], 0);
}

#[test]
fn always_allow_whitelist_overrides_deny() {
    let f = GraftFixture::new();
    let rules = rules(
        r#"{
            "skipped_path_keywords": ["lib64"],
            "always_inject_files": ["libwhitelisted.so"]
        }"#,
    );
    f.supplied_elf("system/lib64/libwhitelisted.so", 2);
    f.supplied_elf("system/lib64/libdenied.so", 2);

    let report = Orchestrator::new(&rules, &f.pre, &f.paths, &f.tools, &f.source_root)
        .run()
        .unwrap();

    assert_eq!(report.direct_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert!(f
        .paths
        .target_out
        .join("system/lib64/libwhitelisted.so")
        .exists());
    assert!(!f.paths.target_out.join("system/lib64/libdenied.so").exists());
}
