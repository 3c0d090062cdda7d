// SPDX-License-Identifier: GPL-3.0-only

mod common;

use common::{FakeSystem, config, manager, partitioning, simple_driver};
use provision_contracts::ProvisionError;
use provision_types::ImageMetadata;

fn positions(calls: &[String], prefix: &str) -> Vec<usize> {
    calls
        .iter()
        .enumerate()
        .filter(|(_, call)| call.starts_with(prefix))
        .map(|(index, _)| index)
        .collect()
}

#[test]
fn storage_is_built_in_dependency_order() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    let manager = manager(
        &fake,
        simple_driver(partitioning(), &ImageMetadata::default()),
        config(scratch.path()),
    );

    manager.do_partitioning().expect("partitioning");
    let calls = fake.calls();

    let wipes = positions(&calls, "md_clean_all");
    assert_eq!(wipes.len(), 2);
    let blacklist = positions(&calls, "blacklist_udev_rules")[0];
    let label = positions(&calls, "make_label /dev/sda gpt")[0];
    let unblacklist = positions(&calls, "unblacklist_udev_rules")[0];
    let pv = positions(&calls, "pv_create /dev/sda4 64 2")[0];
    let vg = positions(&calls, "vg_create os /dev/sda4")[0];
    let lv = positions(&calls, "lv_create os swap 1000")[0];
    let first_fs = positions(&calls, "make_fs")[0];

    assert!(wipes[0] < blacklist);
    assert!(blacklist < label && label < unblacklist);
    assert!(unblacklist < wipes[1]);
    assert!(wipes[1] < pv && pv < vg && vg < lv && lv < first_fs);

    assert!(calls.contains(&"zero_range /dev/sda 0 5 false".to_string()));
    assert!(calls.contains(&"zero_range /dev/sda 22 5 true".to_string()));
    assert!(calls.contains(&"set_partition_flag /dev/sda 1 bios_grub".to_string()));
    assert!(calls.contains(&"make_partition /dev/sda 225 10225 primary optimal".to_string()));
    assert!(!calls.contains(&"refresh_multipath".to_string()));
}

#[test]
fn imaged_filesystems_are_not_formatted() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    let manager = manager(
        &fake,
        simple_driver(partitioning(), &ImageMetadata::default()),
        config(scratch.path()),
    );

    manager.do_partitioning().expect("partitioning");
    assert_eq!(
        fake.calls_named("make_fs"),
        vec![
            "make_fs ext2 /dev/sda2 options= label=".to_string(),
            "make_fs swap /dev/mapper/os-swap options= label=".to_string(),
        ]
    );
}

#[test]
fn udev_rules_come_back_when_partitioning_fails() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    fake.state().fail_on = Some("make_partition /dev/sda 25 225".to_string());
    let manager = manager(
        &fake,
        simple_driver(partitioning(), &ImageMetadata::default()),
        config(scratch.path()),
    );

    let error = manager.do_partitioning().expect_err("partition creation fails");
    assert!(matches!(error, ProvisionError::Execution { .. }));
    assert_eq!(fake.calls().last().map(String::as_str), Some("unblacklist_udev_rules"));
    assert!(fake.calls_named("pv_create").is_empty());
}

#[test]
fn multipath_tables_are_written_with_udev_enabled() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    fake.state().multipath.insert("/dev/sda".to_string());
    let manager = manager(
        &fake,
        simple_driver(partitioning(), &ImageMetadata::default()),
        config(scratch.path()),
    );

    manager.do_partitioning().expect("partitioning");
    let calls = fake.calls();
    let unblacklist = positions(&calls, "unblacklist_udev_rules")[0];
    let label = positions(&calls, "make_label /dev/sda")[0];
    let refresh = positions(&calls, "refresh_multipath")[0];
    assert!(unblacklist < label);
    assert!(label < refresh);
}

#[test]
fn partition_missing_after_creation_fails() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    fake.state().missing_paths.insert("/dev/sda3".to_string());
    let manager = manager(
        &fake,
        simple_driver(partitioning(), &ImageMetadata::default()),
        config(scratch.path()),
    );

    match manager.do_partitioning() {
        Err(ProvisionError::PartitionNotFound(name)) => assert_eq!(name, "/dev/sda3"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(fake.calls().contains(&"unblacklist_udev_rules".to_string()));
}

#[test]
fn kept_data_skips_repartitioning() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    let mut layout = partitioning();
    layout["fss"][0]["keep_data"] = serde_json::json!(true);
    let manager = manager(
        &fake,
        simple_driver(layout, &ImageMetadata::default()),
        config(scratch.path()),
    );

    manager.do_partitioning().expect("partitioning");
    assert_eq!(
        fake.calls(),
        vec!["make_fs swap /dev/mapper/os-swap options= label=".to_string()]
    );
}
