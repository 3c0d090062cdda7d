// SPDX-License-Identifier: GPL-3.0-only

//! LVM (Logical Volume Manager) types
//!
//! Physical volumes and volume groups reference each other by name; the
//! owning [`crate::PartitionScheme`] resolves those names.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PV_METADATA_SIZE: u32 = 16;
pub const DEFAULT_PV_METADATA_COPIES: u32 = 2;

/// Physical volume on a partition or MD device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolume {
    /// Backing device path (e.g., "/dev/sda4")
    pub name: String,

    /// LVM metadata area size in MiB
    pub metadatasize: u32,

    pub metadatacopies: u32,
}

impl PhysicalVolume {
    pub fn new(name: impl Into<String>, metadatasize: u32, metadatacopies: u32) -> Self {
        Self {
            name: name.into(),
            metadatasize,
            metadatacopies,
        }
    }
}

/// Volume group aggregating physical volumes by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub name: String,
    #[serde(default)]
    pub pvnames: Vec<String>,
    #[serde(default)]
    pub keep_data: bool,
}

impl VolumeGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pvnames: Vec::new(),
            keep_data: false,
        }
    }

    pub fn add_pv(&mut self, pvname: &str) {
        if !self.pvnames.iter().any(|name| name == pvname) {
            self.pvnames.push(pvname.to_string());
        }
    }
}

/// Logical volume, size in MiB
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    pub vgname: String,
    pub size: u64,
    #[serde(default)]
    pub keep_data: bool,
}

impl LogicalVolume {
    pub fn new(name: impl Into<String>, vgname: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            vgname: vgname.into(),
            size,
            keep_data: false,
        }
    }

    /// Device-mapper path of this volume. Dashes inside either component are
    /// doubled the same way device-mapper escapes them.
    pub fn device_name(&self) -> String {
        format!(
            "/dev/mapper/{}-{}",
            self.vgname.replace('-', "--"),
            self.name.replace('-', "--")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_escapes_dashes() {
        let lv = LogicalVolume::new("var-log", "os-vg", 1024);
        assert_eq!(lv.device_name(), "/dev/mapper/os--vg-var--log");

        let plain = LogicalVolume::new("root", "os", 1024);
        assert_eq!(plain.device_name(), "/dev/mapper/os-root");
    }

    #[test]
    fn vg_ignores_repeated_pv() {
        let mut vg = VolumeGroup::new("os");
        vg.add_pv("/dev/sda4");
        vg.add_pv("/dev/sda4");
        assert_eq!(vg.pvnames.len(), 1);
    }
}
