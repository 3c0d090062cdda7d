// SPDX-License-Identifier: GPL-3.0-only

//! Block device inventory from sysfs and udev

use std::collections::BTreeMap;

use provision_types::BlockDevice;

/// Kernel block devices that never carry a provisioning target.
const IGNORED_PREFIXES: [&str; 6] = ["loop", "ram", "fd", "sr", "zram", "nbd"];

/// Parse `udevadm info --query=property` output.
pub fn parse_udev_properties(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Names under `/sys/block` worth inspecting.
pub fn candidate_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut names: Vec<String> = names
        .into_iter()
        .filter(|name| !IGNORED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
        .collect();
    names.sort();
    names
}

/// Build an inventory entry from the kernel name and its udev properties.
///
/// Device-mapper nodes are kept only when they are multipath maps, and are
/// addressed through `/dev/mapper`.
pub fn block_device_from_properties(
    name: &str,
    properties: BTreeMap<String, String>,
) -> Option<BlockDevice> {
    let devlinks: Vec<String> = properties
        .get("DEVLINKS")
        .map(|links| links.split_whitespace().map(ToString::to_string).collect())
        .unwrap_or_default();

    let mut device = BlockDevice {
        device: format!("/dev/{name}"),
        devlinks,
        properties,
    };

    if name.starts_with("dm-") {
        if !device.is_multipath() {
            return None;
        }
        if let Some(dm_name) = device.properties.get("DM_NAME") {
            device.device = format!("/dev/mapper/{dm_name}");
        }
    }

    if device.properties.get("DEVTYPE").is_some_and(|devtype| devtype != "disk") {
        return None;
    }
    Some(device)
}
