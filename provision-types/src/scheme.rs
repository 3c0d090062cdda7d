// SPDX-License-Identifier: GPL-3.0-only

//! Partition scheme
//!
//! [`PartitionScheme`] is the arena owning every storage entity of one node.
//! Entities reference each other through device-name strings or [`LoopId`]
//! handles, never through pointers.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemeError};
use crate::filesystem::{DeviceRef, FileSystem, Loop, LoopId};
use crate::lvm::{LogicalVolume, PhysicalVolume, VolumeGroup};
use crate::md::{DEFAULT_MD_LEVEL, DEFAULT_MD_METADATA, Md};
use crate::partition::{Label, Parted, Partition};

const MAX_MD_INDEX: u32 = 127;

/// Options for creating a RAID array on first attachment.
#[derive(Debug, Clone, Default)]
pub struct MdRequest {
    pub name: Option<String>,
    pub level: Option<String>,
    pub metadata: Option<String>,
    pub fs_type: Option<String>,
    pub fs_options: Option<String>,
    pub fs_label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionScheme {
    #[serde(default)]
    pub parteds: Vec<Parted>,
    #[serde(default)]
    pub mds: Vec<Md>,
    #[serde(default)]
    pub pvs: Vec<PhysicalVolume>,
    #[serde(default)]
    pub vgs: Vec<VolumeGroup>,
    #[serde(default)]
    pub lvs: Vec<LogicalVolume>,
    #[serde(default)]
    pub fss: Vec<FileSystem>,
    #[serde(default)]
    pub loops: Vec<Loop>,
}

impl PartitionScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parted(&mut self, name: &str, label: Label) -> Result<&mut Parted> {
        if self.parted_by_name(name).is_some() {
            return Err(SchemeError::wrong_scheme(format!(
                "partition table for {name} is already defined"
            )));
        }
        self.parteds.push(Parted::new(name, label));
        let last = self.parteds.len() - 1;
        Ok(&mut self.parteds[last])
    }

    pub fn add_pv(&mut self, pv: PhysicalVolume) -> &mut PhysicalVolume {
        self.pvs.push(pv);
        let last = self.pvs.len() - 1;
        &mut self.pvs[last]
    }

    pub fn add_vg(&mut self, name: &str) -> &mut VolumeGroup {
        self.vgs.push(VolumeGroup::new(name));
        let last = self.vgs.len() - 1;
        &mut self.vgs[last]
    }

    pub fn add_lv(&mut self, lv: LogicalVolume) -> &LogicalVolume {
        self.lvs.push(lv);
        let last = self.lvs.len() - 1;
        &self.lvs[last]
    }

    pub fn add_fs(&mut self, fs: FileSystem) -> Result<&mut FileSystem> {
        fs.validate()?;
        self.fss.push(fs);
        let last = self.fss.len() - 1;
        Ok(&mut self.fss[last])
    }

    pub fn add_md(&mut self, request: &MdRequest) -> Result<&mut Md> {
        let name = match &request.name {
            Some(name) => name.clone(),
            None => self.md_next_name()?,
        };
        let md = Md::new(
            name,
            request.level.as_deref().unwrap_or(DEFAULT_MD_LEVEL),
            request.metadata.as_deref().unwrap_or(DEFAULT_MD_METADATA),
        );
        self.mds.push(md);
        let last = self.mds.len() - 1;
        Ok(&mut self.mds[last])
    }

    /// First free name in `/dev/md0..=/dev/md127`.
    pub fn md_next_name(&self) -> Result<String> {
        (0..=MAX_MD_INDEX)
            .map(|index| format!("/dev/md{index}"))
            .find(|name| self.md_by_name(name).is_none())
            .ok_or(SchemeError::MdAlreadyExists)
    }

    pub fn md_by_name(&self, name: &str) -> Option<&Md> {
        self.mds.iter().find(|md| md.name == name)
    }

    pub fn md_by_mount(&self, mount: &str) -> Option<&Md> {
        let fs = self.fs_by_mount(mount)?;
        self.md_by_name(fs.device.as_path()?)
    }

    /// Attaches `device` to the array mounted at `mount`, creating the array
    /// and its filesystem on first use.
    pub fn md_attach_by_mount(
        &mut self,
        device: &str,
        mount: &str,
        spare: bool,
        request: &MdRequest,
    ) -> Result<&Md> {
        let index = match self
            .md_by_mount(mount)
            .and_then(|md| self.mds.iter().position(|m| m.name == md.name))
        {
            Some(index) => index,
            None => {
                let md_name = self.add_md(request)?.name.clone();
                let fs = FileSystem::new(
                    md_name.as_str(),
                    Some(mount),
                    request.fs_type.as_deref().unwrap_or(crate::DEFAULT_FS_TYPE),
                )
                .with_options(request.fs_options.clone())
                .with_label(request.fs_label.clone());
                self.add_fs(fs)?;
                self.mds.len() - 1
            }
        };

        let md = &mut self.mds[index];
        if spare {
            md.add_spare(device)?;
        } else {
            md.add_device(device)?;
        }
        Ok(&self.mds[index])
    }

    pub fn parted_by_name(&self, name: &str) -> Option<&Parted> {
        self.parteds.iter().find(|parted| parted.name == name)
    }

    pub fn parted_by_name_mut(&mut self, name: &str) -> Option<&mut Parted> {
        self.parteds.iter_mut().find(|parted| parted.name == name)
    }

    pub fn partition_by_name(&self, name: &str) -> Option<&Partition> {
        self.parteds
            .iter()
            .find_map(|parted| parted.partition_by_name(name))
    }

    pub fn partition_by_name_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.parteds
            .iter_mut()
            .find_map(|parted| parted.partition_by_name_mut(name))
    }

    pub fn vg_by_name(&self, name: &str) -> Option<&VolumeGroup> {
        self.vgs.iter().find(|vg| vg.name == name)
    }

    pub fn pv_by_name(&self, name: &str) -> Option<&PhysicalVolume> {
        self.pvs.iter().find(|pv| pv.name == name)
    }

    pub fn vg_attach_by_name(
        &mut self,
        pvname: &str,
        vgname: &str,
        metadatasize: u32,
        metadatacopies: u32,
    ) {
        if self.pv_by_name(pvname).is_none() {
            self.add_pv(PhysicalVolume::new(pvname, metadatasize, metadatacopies));
        }
        let vg = match self.vgs.iter().position(|vg| vg.name == vgname) {
            Some(index) => &mut self.vgs[index],
            None => self.add_vg(vgname),
        };
        vg.add_pv(pvname);
    }

    pub fn lv_by_device_name(&self, device_name: &str) -> Option<&LogicalVolume> {
        self.lvs.iter().find(|lv| lv.device_name() == device_name)
    }

    pub fn fs_by_mount(&self, mount: &str) -> Option<&FileSystem> {
        self.fss.iter().find(|fs| fs.mount.as_deref() == Some(mount))
    }

    pub fn fs_by_device(&self, device: &DeviceRef) -> Option<&FileSystem> {
        self.fss.iter().find(|fs| &fs.device == device)
    }

    /// Filesystems with a real mount point (swap and format-only excluded).
    pub fn fss_with_mountpoints(&self) -> impl Iterator<Item = &FileSystem> {
        self.fss.iter().filter(|fs| fs.mountpoint().is_some())
    }

    /// Mounted filesystems ordered shallow-first, or deepest-first when
    /// `reverse` is set. Equal depths keep declaration order.
    pub fn fs_sorted_by_depth(&self, reverse: bool) -> Vec<&FileSystem> {
        let mut sorted: Vec<&FileSystem> = self.fss_with_mountpoints().collect();
        if reverse {
            sorted.sort_by_key(|fs| Reverse(fs.depth()));
        } else {
            sorted.sort_by_key(|fs| fs.depth());
        }
        sorted
    }

    pub fn root_device(&self) -> Result<&DeviceRef> {
        self.fs_by_mount("/").map(|fs| &fs.device).ok_or_else(|| {
            SchemeError::wrong_scheme("root file system not found")
        })
    }

    /// Device the bootloader reads kernels from.
    ///
    /// Legacy grub (version 1) cannot read MD metadata, so for an MD-backed
    /// `/boot` it gets the first member instead. It cannot read LVM at all.
    pub fn boot_device(&self, grub_version: u8) -> Result<String> {
        let boot_fs = self
            .fs_by_mount("/boot")
            .or_else(|| self.fs_by_mount("/"))
            .ok_or_else(|| SchemeError::wrong_scheme("boot file system not found"))?;
        let device = self.resolve_device(&boot_fs.device).ok_or_else(|| {
            SchemeError::wrong_scheme(format!("boot device {} is not attached", boot_fs.device))
        })?;

        if grub_version == 1 {
            if let Some(md) = self.md_by_name(&device) {
                return md.devices.first().cloned().ok_or_else(|| {
                    SchemeError::wrong_scheme(format!(
                        "md device {} does not have devices attached",
                        md.name
                    ))
                });
            }
            if self.lv_by_device_name(&device).is_some() {
                return Err(SchemeError::wrong_scheme(format!(
                    "found boot device {device} but legacy grub is not able to mount logical volumes"
                )));
            }
        }

        Ok(device)
    }

    pub fn configdrive_device(&self) -> Option<&str> {
        self.parteds
            .iter()
            .flat_map(|parted| parted.partitions.iter())
            .find(|partition| partition.configdrive)
            .and_then(|partition| partition.name.as_deref())
    }

    /// Moves `keep_data` markers from partitions up to the objects built on
    /// them, so each chain carries the flag on exactly one level.
    pub fn elevate_keep_data(&mut self) {
        tracing::debug!("Elevating keep_data flags from partitions");

        for vg_index in 0..self.vgs.len() {
            let pvnames = self.vgs[vg_index].pvnames.clone();
            for pvname in pvnames {
                if let Some(partition) = self.partition_by_name_mut(&pvname)
                    && partition.keep_data
                {
                    partition.keep_data = false;
                    self.vgs[vg_index].keep_data = true;
                    tracing::debug!(vg = %self.vgs[vg_index].name, "keep_data moved to volume group");
                }
            }
        }

        for lv in &mut self.lvs {
            if self.vgs.iter().any(|vg| vg.name == lv.vgname && vg.keep_data) {
                lv.keep_data = true;
            }
        }

        for vg in &mut self.vgs {
            if vg.keep_data
                && self
                    .lvs
                    .iter()
                    .any(|lv| lv.vgname == vg.name && lv.keep_data)
            {
                vg.keep_data = false;
            }
        }

        for fs_index in 0..self.fss.len() {
            let Some(device) = self.fss[fs_index].device.as_path().map(str::to_string) else {
                continue;
            };
            if let Some(lv) = self.lvs.iter_mut().find(|lv| lv.device_name() == device) {
                if lv.keep_data {
                    lv.keep_data = false;
                    self.fss[fs_index].keep_data = true;
                    tracing::debug!(device = %device, "keep_data moved from logical volume to filesystem");
                }
                continue;
            }
            if let Some(partition) = self.partition_by_name_mut(&device)
                && partition.keep_data
            {
                partition.keep_data = false;
                self.fss[fs_index].keep_data = true;
                tracing::debug!(device = %device, "keep_data moved from partition to filesystem");
            }
        }
    }

    /// True when anything in the scheme must be preserved, which rules out
    /// rewriting partition tables.
    pub fn skip_partitioning(&self) -> bool {
        self.fss.iter().any(|fs| fs.keep_data)
            || self.lvs.iter().any(|lv| lv.keep_data)
            || self.vgs.iter().any(|vg| vg.keep_data)
            || self
                .parteds
                .iter()
                .flat_map(|parted| parted.partitions.iter())
                .any(|partition| partition.keep_data)
    }

    pub fn add_loop(&mut self) -> LoopId {
        self.loops.push(Loop::default());
        LoopId(self.loops.len() - 1)
    }

    pub fn assign_loop(&mut self, id: LoopId, name: &str) -> Result<()> {
        self.loops
            .get_mut(id.0)
            .ok_or(SchemeError::UnknownLoop(id.0))?
            .assign(name)
    }

    /// Concrete device path, if the reference is a path or an attached loop.
    pub fn resolve_device(&self, device: &DeviceRef) -> Option<String> {
        match device {
            DeviceRef::Path(path) => Some(path.clone()),
            DeviceRef::Loop { loop_id } => self.loops.get(loop_id.0)?.name.clone(),
        }
    }

    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| SchemeError::WrongInputData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionRequest;

    fn scheme_with_disk() -> PartitionScheme {
        let mut scheme = PartitionScheme::new();
        let parted = scheme.add_parted("/dev/sda", Label::Gpt).expect("add parted");
        parted.add_partition(PartitionRequest::sized(24).flag("bios_grub"));
        parted.add_partition(PartitionRequest::sized(200));
        scheme
    }

    #[test]
    fn duplicate_parted_is_rejected() {
        let mut scheme = scheme_with_disk();
        assert!(scheme.add_parted("/dev/sda", Label::Gpt).is_err());
    }

    #[test]
    fn add_fs_rejects_relative_mount() {
        let mut scheme = PartitionScheme::new();
        let result = scheme.add_fs(FileSystem::new("/dev/sda3", Some("boot"), "ext2"));
        assert!(matches!(result, Err(SchemeError::WrongFsMount(_))));
        assert!(scheme.fss.is_empty());
    }

    #[test]
    fn md_names_fill_first_free_slot() {
        let mut scheme = PartitionScheme::new();
        scheme.mds.push(Md::new("/dev/md0", "mirror", "default"));
        scheme.mds.push(Md::new("/dev/md2", "mirror", "default"));
        assert_eq!(scheme.md_next_name().expect("free name"), "/dev/md1");

        let mut full = PartitionScheme::new();
        for index in 0..=127 {
            full.mds.push(Md::new(format!("/dev/md{index}"), "mirror", "default"));
        }
        assert_eq!(full.md_next_name(), Err(SchemeError::MdAlreadyExists));
    }

    #[test]
    fn md_attach_reuses_array_by_mount() {
        let mut scheme = PartitionScheme::new();
        let request = MdRequest {
            fs_type: Some("ext4".to_string()),
            ..MdRequest::default()
        };
        scheme
            .md_attach_by_mount("/dev/sda3", "/var", false, &request)
            .expect("first member");
        let md = scheme
            .md_attach_by_mount("/dev/sdb3", "/var", false, &request)
            .expect("second member")
            .clone();

        assert_eq!(scheme.mds.len(), 1);
        assert_eq!(md.name, "/dev/md0");
        assert_eq!(md.level, "mirror");
        assert_eq!(md.devices, vec!["/dev/sda3", "/dev/sdb3"]);
        let fs = scheme.fs_by_mount("/var").expect("md filesystem");
        assert!(fs.device.is_path("/dev/md0"));
        assert_eq!(fs.fs_type, "ext4");
    }

    #[test]
    fn vg_attach_creates_pv_and_vg_once() {
        let mut scheme = PartitionScheme::new();
        scheme.vg_attach_by_name("/dev/sda3", "os", 28, 2);
        scheme.vg_attach_by_name("/dev/sdb3", "os", 28, 2);
        assert_eq!(scheme.vgs.len(), 1);
        assert_eq!(scheme.pvs.len(), 2);
        assert_eq!(scheme.vgs[0].pvnames, vec!["/dev/sda3", "/dev/sdb3"]);
        assert_eq!(scheme.pvs[0].metadatasize, 28);
    }

    #[test]
    fn sorted_by_depth_skips_swap_and_unmounted() {
        let mut scheme = PartitionScheme::new();
        for (device, mount) in [
            ("/dev/a", Some("/var/lib/mysql")),
            ("/dev/b", Some("/")),
            ("/dev/c", Some("swap")),
            ("/dev/d", Some("/var")),
            ("/dev/e", None),
            ("/dev/f", Some("/boot")),
        ] {
            scheme
                .add_fs(FileSystem::new(device, mount, "ext4"))
                .expect("add fs");
        }

        let mounts: Vec<_> = scheme
            .fs_sorted_by_depth(false)
            .into_iter()
            .filter_map(|fs| fs.mount.clone())
            .collect();
        assert_eq!(mounts, vec!["/", "/var", "/boot", "/var/lib/mysql"]);

        let reversed: Vec<_> = scheme
            .fs_sorted_by_depth(true)
            .into_iter()
            .filter_map(|fs| fs.mount.clone())
            .collect();
        assert_eq!(reversed, vec!["/var/lib/mysql", "/var", "/boot", "/"]);
    }

    #[test]
    fn root_device_requires_root_fs() {
        let scheme = PartitionScheme::new();
        assert!(matches!(
            scheme.root_device(),
            Err(SchemeError::WrongPartitionScheme(_))
        ));
    }

    #[test]
    fn boot_device_falls_back_to_root() {
        let mut scheme = PartitionScheme::new();
        scheme
            .add_fs(FileSystem::new("/dev/sda3", Some("/"), "ext4"))
            .expect("root fs");
        assert_eq!(scheme.boot_device(2).expect("boot device"), "/dev/sda3");
        assert!(PartitionScheme::new().boot_device(2).is_err());
    }

    #[test]
    fn legacy_grub_boot_device_uses_first_md_member() {
        let mut scheme = PartitionScheme::new();
        for device in ["/dev/sda3", "/dev/sdb3"] {
            scheme
                .md_attach_by_mount(device, "/boot", false, &MdRequest::default())
                .expect("attach md member");
        }

        assert_eq!(scheme.boot_device(1).expect("legacy boot"), "/dev/sda3");
        assert_eq!(scheme.boot_device(2).expect("modern boot"), "/dev/md0");
    }

    #[test]
    fn legacy_grub_rejects_lv_boot_device() {
        let mut scheme = PartitionScheme::new();
        let device = scheme
            .add_lv(LogicalVolume::new("boot", "os", 512))
            .device_name();
        scheme
            .add_fs(FileSystem::new(device.as_str(), Some("/boot"), "ext2"))
            .expect("boot fs");

        assert!(matches!(
            scheme.boot_device(1),
            Err(SchemeError::WrongPartitionScheme(_))
        ));
        assert_eq!(scheme.boot_device(2).expect("modern boot"), device);
    }

    #[test]
    fn configdrive_device_is_first_marked_partition() {
        let mut scheme = scheme_with_disk();
        assert_eq!(scheme.configdrive_device(), None);
        scheme
            .parted_by_name_mut("/dev/sda")
            .expect("parted")
            .add_partition(PartitionRequest::sized(20).configdrive());
        assert_eq!(scheme.configdrive_device(), Some("/dev/sda3"));
    }

    fn keep_data_scheme() -> PartitionScheme {
        let mut scheme = scheme_with_disk();
        let parted = scheme.parted_by_name_mut("/dev/sda").expect("parted");
        parted.add_partition(PartitionRequest::sized(1000).keep_data(true));
        parted.add_partition(PartitionRequest::sized(5000).keep_data(true));
        parted.add_partition(PartitionRequest::sized(5000));
        scheme
            .add_fs(FileSystem::new("/dev/sda3", Some("/"), "ext4"))
            .expect("root fs");
        scheme.vg_attach_by_name("/dev/sda4", "os", 28, 2);
        scheme.vg_attach_by_name("/dev/sda5", "image", 28, 2);
        let var = scheme.add_lv(LogicalVolume::new("var", "os", 2000)).device_name();
        scheme
            .add_fs(FileSystem::new(var.as_str(), Some("/var"), "xfs"))
            .expect("var fs");
        scheme
    }

    fn flags(scheme: &PartitionScheme) -> Vec<bool> {
        let mut flags: Vec<bool> = scheme
            .parteds
            .iter()
            .flat_map(|p| p.partitions.iter().map(|partition| partition.keep_data))
            .collect();
        flags.extend(scheme.vgs.iter().map(|vg| vg.keep_data));
        flags.extend(scheme.lvs.iter().map(|lv| lv.keep_data));
        flags.extend(scheme.fss.iter().map(|fs| fs.keep_data));
        flags
    }

    #[test]
    fn elevate_keep_data_moves_flag_to_leaves() {
        let mut scheme = keep_data_scheme();
        scheme.elevate_keep_data();

        assert!(scheme.parteds[0].partitions.iter().all(|p| !p.keep_data));
        assert!(!scheme.vg_by_name("os").expect("os vg").keep_data);
        assert!(!scheme.lvs[0].keep_data);
        assert!(scheme.fs_by_mount("/").expect("root").keep_data);
        assert!(scheme.fs_by_mount("/var").expect("var").keep_data);
        assert!(!scheme.vg_by_name("image").expect("image vg").keep_data);
        assert!(scheme.skip_partitioning());
    }

    #[test]
    fn elevate_keep_data_is_idempotent() {
        let mut once = keep_data_scheme();
        once.elevate_keep_data();
        let mut twice = once.clone();
        twice.elevate_keep_data();
        assert_eq!(flags(&once), flags(&twice));
    }

    #[test]
    fn vg_without_lvs_keeps_the_flag() {
        let mut scheme = scheme_with_disk();
        scheme
            .parted_by_name_mut("/dev/sda")
            .expect("parted")
            .add_partition(PartitionRequest::sized(1000).keep_data(true));
        scheme.vg_attach_by_name("/dev/sda3", "image", 28, 2);
        scheme.elevate_keep_data();

        assert!(scheme.vg_by_name("image").expect("vg").keep_data);
        assert!(scheme.skip_partitioning());
    }

    #[test]
    fn skip_partitioning_false_without_markers() {
        assert!(!scheme_with_disk().skip_partitioning());
    }

    #[test]
    fn loop_placeholders_resolve_after_assignment() {
        let mut scheme = PartitionScheme::new();
        let id = scheme.add_loop();
        let device = DeviceRef::from(id);
        assert_eq!(scheme.resolve_device(&device), None);

        scheme.assign_loop(id, "/dev/loop4").expect("assign loop");
        assert_eq!(scheme.resolve_device(&device).as_deref(), Some("/dev/loop4"));
        assert!(scheme.assign_loop(id, "/dev/loop5").is_err());
        assert_eq!(
            scheme.assign_loop(LoopId(9), "/dev/loop6"),
            Err(SchemeError::UnknownLoop(9))
        );
    }

    #[test]
    fn scheme_dict_roundtrip() {
        let mut scheme = keep_data_scheme();
        scheme
            .md_attach_by_mount("/dev/sda6", "/srv", true, &MdRequest::default())
            .expect("md with spare");
        let id = scheme.add_loop();
        scheme
            .add_fs(FileSystem::new(id, Some("/opt"), "ext4"))
            .expect("loop fs");

        let parsed = PartitionScheme::from_dict(scheme.to_dict()).expect("from dict");
        assert_eq!(parsed, scheme);
    }
}
