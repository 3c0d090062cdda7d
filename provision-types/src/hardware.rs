// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Block device as reported by the host inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device path (e.g., "/dev/sda" or "/dev/mapper/mpatha")
    pub device: String,

    /// udev DEVLINKS (by-id, by-path, ...)
    #[serde(default)]
    pub devlinks: Vec<String>,

    /// Raw udev properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl BlockDevice {
    pub fn new(device: impl Into<String>, devlinks: &[&str]) -> Self {
        Self {
            device: device.into(),
            devlinks: devlinks.iter().map(|link| link.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }

    pub fn has_link(&self, link: &str) -> bool {
        self.devlinks.iter().any(|own| own == link)
    }

    pub fn by_id_links(&self) -> impl Iterator<Item = &str> {
        self.devlinks
            .iter()
            .map(String::as_str)
            .filter(|link| link.starts_with("/dev/disk/by-id/"))
    }

    pub fn is_multipath(&self) -> bool {
        self.properties
            .get("DM_UUID")
            .is_some_and(|uuid| uuid.starts_with("mpath-"))
    }
}
