// SPDX-License-Identifier: GPL-3.0-only

mod common;

use common::{FakeSystem, node, partitioning};
use provision_agent::{AgentConfig, load_driver};
use provision_contracts::ProvisionError;
use provision_layout::DriverKind;
use provision_types::SchemeError;

const METADATA_URI: &str = "file:///srv/images/root.yaml";

#[test]
fn published_metadata_feeds_checksums() {
    let fake = FakeSystem::new();
    fake.state().documents.insert(
        METADATA_URI.to_string(),
        "images:\n- container_name: root.img\n  raw_md5: fakeroot\n  raw_size: 1234\n".to_string(),
    );
    let raw = node(partitioning()).to_string();

    let driver = load_driver(DriverKind::Simple, &raw, &fake.toolbox(), &AgentConfig::default())
        .expect("simple plan");

    assert_eq!(fake.calls(), vec![format!("fetch_text {METADATA_URI}")]);
    let root = &driver.image_scheme().images[0];
    assert_eq!(root.expected_checksum(), Some((1234, "fakeroot")));
}

#[test]
fn unreachable_metadata_leaves_images_unverified() {
    let fake = FakeSystem::new();
    let raw = node(partitioning()).to_string();

    let driver = load_driver(DriverKind::Simple, &raw, &fake.toolbox(), &AgentConfig::default())
        .expect("simple plan");

    assert_eq!(driver.image_scheme().images.len(), 1);
    assert_eq!(driver.image_scheme().images[0].expected_checksum(), None);
}

#[test]
fn malformed_input_is_rejected() {
    let fake = FakeSystem::new();
    let error = load_driver(
        DriverKind::Nailgun,
        "{\"ks_meta\": 42}",
        &fake.toolbox(),
        &AgentConfig::default(),
    )
    .expect_err("malformed node data");
    assert!(matches!(
        error,
        ProvisionError::Scheme(SchemeError::WrongInputData(_))
    ));
    assert!(fake.calls().is_empty());
}
