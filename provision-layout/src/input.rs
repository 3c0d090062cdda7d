// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning input as delivered by the orchestrator
//!
//! `ks_spaces` is the declarative disk spec: a flat list of disks and volume
//! groups. Everything else in [`ProvisionData`] feeds the operating system,
//! bootloader and configdrive settings.

use std::collections::BTreeMap;

use provision_types::{Container, Repo, Result, SchemeError};
use serde::{Deserialize, Serialize};

/// Volume kinds understood by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Boot,
    Partition,
    Pv,
    Raid,
    LvmMetaPool,
    Cephjournal,
    Ceph,
    Lv,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsVolume {
    #[serde(rename = "type")]
    pub kind: VolumeKind,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default)]
    pub file_system: Option<String>,
    #[serde(default)]
    pub disk_label: Option<String>,
    #[serde(default)]
    pub vg: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub partition_guid: Option<String>,
    #[serde(default)]
    pub lvm_meta_size: Option<u32>,
    #[serde(default)]
    pub keep_data: bool,
}

impl KsVolume {
    pub fn is_allocated(&self) -> bool {
        self.size > 0
    }

    pub fn mounts_at(&self, mount: &str) -> bool {
        self.mount.as_deref() == Some(mount)
    }

    /// Volume that turns into a partition of its own.
    pub fn is_partition_like(&self) -> bool {
        matches!(
            self.kind,
            VolumeKind::Partition | VolumeKind::Pv | VolumeKind::Raid | VolumeKind::Ceph
        )
    }

    pub fn is_ceph_journal(&self) -> bool {
        self.kind == VolumeKind::Cephjournal || self.name.as_deref() == Some("cephjournal")
    }

    pub fn is_ceph_osd(&self) -> bool {
        self.kind == VolumeKind::Ceph || self.name.as_deref() == Some("ceph")
    }

    fn is_partition_or_raid(&self) -> bool {
        matches!(self.kind, VolumeKind::Partition | VolumeKind::Raid)
    }

    pub fn is_os_pv(&self) -> bool {
        self.is_allocated() && self.kind == VolumeKind::Pv && self.vg.as_deref() == Some("os")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsDisk {
    pub id: String,
    pub name: String,
    /// Stable aliases relative to `/dev` (e.g., "disk/by-id/wwn-0x5000c5")
    #[serde(default)]
    pub extra: Vec<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub volumes: Vec<KsVolume>,
    #[serde(default)]
    pub bootable: bool,
}

impl KsDisk {
    pub fn is_nvme(&self) -> bool {
        self.name.contains("nvme")
    }

    /// Declares a `/boot` partition or RAID leg.
    pub fn has_boot_volume(&self) -> bool {
        self.volumes
            .iter()
            .any(|v| v.is_partition_or_raid() && v.mounts_at("/boot"))
    }

    /// Declares the root filesystem on a plain partition or RAID leg.
    pub fn is_root_disk(&self) -> bool {
        self.volumes
            .iter()
            .any(|v| v.is_partition_or_raid() && v.mounts_at("/"))
    }

    /// Hosts a physical volume of the `os` volume group.
    pub fn is_os_disk(&self) -> bool {
        self.volumes.iter().any(KsVolume::is_os_pv)
    }

    /// True when nothing besides boot placeholders would be allocated here.
    pub fn is_unallocated(&self) -> bool {
        self.volumes
            .iter()
            .filter(|v| {
                !matches!(v.kind, VolumeKind::Boot | VolumeKind::LvmMetaPool)
                    && !v.mounts_at("/boot")
            })
            .all(|v| !v.is_allocated())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsVg {
    pub id: String,
    #[serde(default)]
    pub volumes: Vec<KsVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KsSpace {
    Disk(KsDisk),
    Vg(KsVg),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmData {
    #[serde(default)]
    pub ks_spaces: Vec<KsSpace>,
    #[serde(default)]
    pub kernel_params: String,
}

impl PmData {
    /// Disks with a positive size, in declaration order.
    pub fn ks_disks(&self) -> impl Iterator<Item = &KsDisk> {
        self.ks_spaces.iter().filter_map(|space| match space {
            KsSpace::Disk(disk) if disk.size > 0 => Some(disk),
            _ => None,
        })
    }

    pub fn ks_vgs(&self) -> impl Iterator<Item = &KsVg> {
        self.ks_spaces.iter().filter_map(|space| match space {
            KsSpace::Vg(vg) => Some(vg),
            KsSpace::Disk(_) => None,
        })
    }

    /// Allocated volumes across all disks matching `predicate`.
    pub fn count_volumes(&self, predicate: impl Fn(&KsVolume) -> bool) -> usize {
        self.ks_disks()
            .flat_map(|disk| disk.volumes.iter())
            .filter(|v| v.is_allocated() && predicate(v))
            .count()
    }
}

/// Placement of one filesystem image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub uri: String,
    pub format: String,
    pub container: Container,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KsMeta {
    #[serde(default)]
    pub pm_data: PmData,
    /// Mount point to image placement
    #[serde(default)]
    pub image_data: BTreeMap<String, ImageData>,
    #[serde(default)]
    pub kernel_lt: Option<serde_json::Value>,
    #[serde(default)]
    pub authorized_keys: Vec<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub master_ip: Option<String>,
    #[serde(default)]
    pub gw: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl KsMeta {
    /// `kernel_lt` follows the orchestrator's truthiness: 0, "", false and
    /// null all mean "not requested".
    pub fn wants_lt_kernel(&self) -> bool {
        match &self.kernel_lt {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub mac_address: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
}

/// Full provisioning input of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionData {
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub hostname: String,
    /// Comma separated, possibly quoted
    #[serde(default)]
    pub name_servers: Option<String>,
    #[serde(default)]
    pub name_servers_search: Option<String>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, Interface>,
    #[serde(default)]
    pub kernel_options: BTreeMap<String, String>,
    #[serde(default)]
    pub ks_meta: KsMeta,
}

impl ProvisionData {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SchemeError::WrongInputData(e.to_string()))
    }

    pub fn pm_data(&self) -> &PmData {
        &self.ks_meta.pm_data
    }
}

/// Input of the pre-resolved driver: a serialized partition scheme next to
/// the regular node data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleData {
    #[serde(flatten)]
    pub node: ProvisionData,
    #[serde(default)]
    pub partitioning: serde_json::Value,
}

impl SimpleData {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SchemeError::WrongInputData(e.to_string()))
    }
}

/// Input of the image build driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildImageData {
    #[serde(default)]
    pub image_data: BTreeMap<String, ImageData>,
    /// Directory receiving the packed images and the metadata record
    pub output: String,
    #[serde(default)]
    pub repos: Vec<Repo>,
    #[serde(default)]
    pub packages: Option<Vec<String>>,
}

impl BuildImageData {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SchemeError::WrongInputData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ks_spaces_are_split_by_type() {
        let raw = r#"{
            "ks_meta": {"pm_data": {"kernel_params": "console=ttyS0", "ks_spaces": [
                {"type": "disk", "id": "sda", "name": "sda", "size": 100,
                 "volumes": [{"type": "boot", "size": 300},
                             {"type": "pv", "vg": "os", "size": 20000, "lvm_meta_size": 64}]},
                {"type": "disk", "id": "sdb", "name": "sdb", "size": 0, "volumes": []},
                {"type": "vg", "id": "os", "volumes": [
                    {"type": "lv", "name": "root", "mount": "/", "size": 10000}]}
            ]}}
        }"#;
        let data = ProvisionData::from_json(raw).expect("parse provision data");
        let disks: Vec<_> = data.pm_data().ks_disks().map(|d| d.name.as_str()).collect();
        assert_eq!(disks, vec!["sda"]);
        assert_eq!(data.pm_data().ks_vgs().count(), 1);
        assert!(data.pm_data().ks_disks().all(KsDisk::is_os_disk));
        assert_eq!(data.pm_data().kernel_params, "console=ttyS0");
    }

    #[test]
    fn unknown_volume_types_are_tolerated() {
        let volume: KsVolume =
            serde_json::from_str(r#"{"type": "glance", "size": 10}"#).expect("parse volume");
        assert_eq!(volume.kind, VolumeKind::Other);
        assert!(!volume.is_partition_like());
    }

    #[test]
    fn disk_with_only_boot_placeholders_is_unallocated() {
        let disk: KsDisk = serde_json::from_str(
            r#"{"id": "sdb", "name": "sdb", "size": 100, "volumes": [
                {"type": "boot", "size": 300},
                {"type": "lvm_meta_pool", "size": 64},
                {"type": "raid", "mount": "/boot", "size": 200},
                {"type": "pv", "vg": "image", "size": 0}
            ]}"#,
        )
        .expect("parse disk");
        assert!(disk.is_unallocated());
        assert!(disk.has_boot_volume());
        assert!(!disk.is_root_disk());
    }

    #[test]
    fn kernel_lt_truthiness() {
        let mut meta = KsMeta::default();
        assert!(!meta.wants_lt_kernel());
        meta.kernel_lt = Some(serde_json::json!(0));
        assert!(!meta.wants_lt_kernel());
        meta.kernel_lt = Some(serde_json::json!(1));
        assert!(meta.wants_lt_kernel());
        meta.kernel_lt = Some(serde_json::json!(""));
        assert!(!meta.wants_lt_kernel());
    }
}
