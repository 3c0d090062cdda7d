// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::path::{Path, PathBuf};

use common::{FakeSystem, config, manager};
use provision_agent::load_driver;
use provision_contracts::ProvisionError;
use provision_layout::{Driver, DriverKind, parse_image_metadata};
use provision_types::Container;

fn build_request(output: &Path) -> String {
    serde_json::json!({
        "output": output.display().to_string(),
        "packages": ["openssh-server", "vim"],
        "repos": [{"name": "ubuntu", "uri": "http://archive.ubuntu.com/ubuntu", "suite": "trusty", "section": "main"}],
        "image_data": {
            "/": {"uri": "http://host/targetimages/root.img.gz", "format": "ext4", "container": "gzip"}
        }
    })
    .to_string()
}

fn build_driver(fake: &FakeSystem, output: &Path) -> Driver {
    load_driver(
        DriverKind::BuildImage,
        &build_request(output),
        &fake.toolbox(),
        &provision_agent::AgentConfig::default(),
    )
    .expect("build plan")
}

fn chroot_of(fake: &FakeSystem) -> PathBuf {
    let bind = fake.calls_named("mount_bind").remove(0);
    let chroot = bind.split(' ').nth(1).expect("bind mount chroot");
    PathBuf::from(chroot)
}

fn assert_chroot_released(fake: &FakeSystem) {
    let chroot = chroot_of(fake);
    let umounts = fake.calls_named("umount_fs");
    assert!(umounts.contains(&format!("umount_fs {}", chroot.join("proc").display())));
    assert!(umounts.contains(&format!("umount_fs {}", chroot.join("").display())));
    assert!(!chroot.exists());
}

#[test]
fn image_is_built_packed_and_described() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let output = scratch.path().join("out");
    let fake = FakeSystem::new();
    let mut manager = manager(&fake, build_driver(&fake, &output), config(scratch.path()));

    manager.do_build_image().expect("build image");

    let calls = fake.calls();
    let position = |prefix: &str| {
        calls
            .iter()
            .position(|call| call.starts_with(prefix))
            .unwrap_or_else(|| panic!("no call starting with {prefix}"))
    };
    assert!(position("attach_loop") < position("make_fs ext4 /dev/loop0"));
    assert!(position("set_journal /dev/loop0 false") < position("install"));
    assert!(position("install") < position("stop_chrooted_processes"));
    assert!(position("set_journal /dev/loop0 true") < position("detach_loop /dev/loop0"));
    assert!(position("detach_loop /dev/loop0") < position("containerize"));
    assert!(calls.iter().any(|call| call.ends_with("openssh-server,vim")));

    assert!(output.join("root.img.gz").is_file());
    let metadata = std::fs::read_to_string(output.join("root.yaml")).expect("metadata record");
    let metadata = parse_image_metadata(&metadata);
    assert_eq!(metadata.images.len(), 1);
    let record = &metadata.images[0];
    assert_eq!(record.container_name, "root.img.gz");
    assert_eq!(record.raw_size, Some(9));
    assert_eq!(record.raw_md5.as_deref(), Some("md5-9"));
    assert_eq!(record.container, Some(Container::Gzip));
    assert_eq!(metadata.packages, vec!["openssh-server", "vim"]);
    assert_eq!(metadata.repos[0]["type"], "deb");
    assert_eq!(metadata.os.as_ref().map(|os| os.name.as_str()), Some("ubuntu"));
    assert!(metadata.created_at.is_some());

    assert_chroot_released(&fake);
}

#[test]
fn stuck_processes_fail_the_build_but_teardown_runs() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let output = scratch.path().join("out");
    let fake = FakeSystem::new();
    fake.state().processes_stop = false;
    let config = config(scratch.path());
    let build_dir = config.image_build_dir.clone();
    let mut manager = manager(&fake, build_driver(&fake, &output), config);

    let error = manager.do_build_image().expect_err("processes survive");
    assert!(matches!(error, ProvisionError::UnexpectedProcess(_)));

    assert_eq!(fake.calls_named("detach_loop"), vec!["detach_loop /dev/loop0"]);
    assert!(fake.calls_named("containerize").is_empty());
    assert!(!build_dir.join("image1.provision-image").exists());
    assert_chroot_released(&fake);
}

#[test]
fn existing_images_are_not_rebuilt() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let output = scratch.path().join("out");
    std::fs::create_dir_all(&output).expect("output dir");
    std::fs::write(output.join("root.img.gz"), b"packed").expect("existing image");
    let fake = FakeSystem::new();
    let mut manager = manager(&fake, build_driver(&fake, &output), config(scratch.path()));

    manager.do_build_image().expect("build image");
    assert!(fake.calls().is_empty());
}

#[test]
fn provisioning_driver_does_not_build() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let fake = FakeSystem::new();
    let mut manager = manager(
        &fake,
        common::simple_driver(common::partitioning(), &Default::default()),
        config(scratch.path()),
    );
    assert!(manager.do_build_image().is_err());
}

#[test]
fn chroot_is_kept_when_unmounting_fails() {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let output = scratch.path().join("out");
    let fake = FakeSystem::new();
    fake.state().fail_on = Some("umount_fs".to_string());
    let mut manager = manager(&fake, build_driver(&fake, &output), config(scratch.path()));

    assert!(manager.do_build_image().is_err());
    let chroot = chroot_of(&fake);
    assert!(chroot.join("proc").is_dir());
}
