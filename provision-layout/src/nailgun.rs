// SPDX-License-Identifier: GPL-3.0-only

//! Translation of `ks_spaces` into a partition scheme
//!
//! Every disk with something to allocate gets a GPT label, a bios_grub
//! partition and a reserved (future UEFI) partition, followed by the declared
//! volumes in order. Volume groups are resolved after all disks so that
//! physical volumes from several disks end up in the same group.

use std::collections::BTreeMap;

use provision_types::{
    BlockDevice, ConfigDriveScheme, FileSystem, Grub, Image, ImageMetadata, ImageScheme, Label,
    LegacyGrubRelease, LogicalVolume, MdRequest, OperatingSystem, Parted, PartitionRequest,
    PartitionScheme, Result, SchemeError, image_metadata_uri, normalize_mount, uri_basename,
};

use crate::disks::{boot_disks, disk_dev};
use crate::input::{ImageData, KsDisk, KsVolume, PmData, ProvisionData, VolumeKind};
use crate::system;

pub const BIOS_GRUB_SIZE: u64 = 24;
pub const UEFI_RESERVED_SIZE: u64 = 200;
pub const CONFIGDRIVE_SIZE: u64 = 20;
pub const MAX_CEPH_JOURNAL_SIZE: u64 = 10240;
pub const DEFAULT_LVM_META_SIZE: u32 = 64;
const MIN_LVM_META_SIZE: u32 = 10;

const MD_METADATA_LEGACY: &str = "0.90";
const MD_METADATA_DEFAULT: &str = "default";

/// Knobs the translator takes from the agent configuration.
#[derive(Debug, Clone, Default)]
pub struct LayoutOptions {
    /// Reserve a configdrive partition and fail when none fits
    pub needs_configdrive: bool,
    /// Releases booting with legacy grub, which also need MD metadata 0.90
    pub legacy_grub_releases: Vec<LegacyGrubRelease>,
}

/// Journal partitions still to be handed out across disks.
struct CephJournals {
    osds: usize,
    journals: usize,
    left: usize,
}

impl CephJournals {
    fn new(pm_data: &PmData) -> Self {
        let osds = pm_data.count_volumes(KsVolume::is_ceph_osd);
        Self {
            osds,
            journals: pm_data.count_volumes(KsVolume::is_ceph_journal),
            left: osds,
        }
    }

    /// Partitions per journal volume, spreading OSDs evenly over journals.
    fn ratio(&self) -> usize {
        if self.journals == 0 {
            return 0;
        }
        self.osds.div_ceil(self.journals)
    }

    /// Number and size of partitions to carve out of a journal volume.
    fn take(&mut self, volume_size: u64) -> (usize, u64) {
        let ratio = self.ratio();
        if ratio == 0 {
            return (0, 0);
        }
        let size = (volume_size / ratio as u64).min(MAX_CEPH_JOURNAL_SIZE);
        let count = ratio.min(self.left);
        self.left -= count;
        (count, size)
    }
}

struct Partitioner<'a> {
    pm_data: &'a PmData,
    devices: &'a [BlockDevice],
    boot_disks: Vec<&'a KsDisk>,
    needs_configdrive: bool,
    md_metadata: &'static str,
    scheme: PartitionScheme,
    journals: CephJournals,
    boot_partition_done: bool,
    boot_fs_done: bool,
}

impl<'a> Partitioner<'a> {
    fn new(
        pm_data: &'a PmData,
        devices: &'a [BlockDevice],
        needs_configdrive: bool,
        legacy_grub: bool,
    ) -> Result<Self> {
        Ok(Self {
            pm_data,
            devices,
            boot_disks: boot_disks(pm_data)?,
            needs_configdrive,
            md_metadata: if legacy_grub {
                MD_METADATA_LEGACY
            } else {
                MD_METADATA_DEFAULT
            },
            scheme: PartitionScheme::new(),
            journals: CephJournals::new(pm_data),
            boot_partition_done: false,
            boot_fs_done: false,
        })
    }

    fn is_boot_disk(&self, disk: &KsDisk) -> bool {
        self.boot_disks.iter().any(|d| d.name == disk.name)
    }

    fn build(mut self) -> Result<PartitionScheme> {
        tracing::debug!("Preparing partition scheme");
        let pm_data = self.pm_data;

        for disk in pm_data.ks_disks() {
            if disk.is_unallocated() {
                tracing::debug!("Disk {} has nothing to allocate, skipping", disk.name);
                continue;
            }
            self.add_disk(disk)?;
        }

        if pm_data.ks_disks().any(KsDisk::has_boot_volume)
            && (!self.boot_partition_done || !self.boot_fs_done)
        {
            return Err(SchemeError::wrong_scheme(
                "/boot partition has not been created",
            ));
        }
        if self.needs_configdrive && self.scheme.configdrive_device().is_none() {
            return Err(SchemeError::wrong_scheme(
                "configdrive partition has not been created",
            ));
        }

        for vg in pm_data.ks_vgs() {
            for volume in &vg.volumes {
                if !volume.is_allocated() || volume.kind != VolumeKind::Lv {
                    continue;
                }
                let Some(name) = volume.name.as_deref() else {
                    return Err(SchemeError::WrongInputData(format!(
                        "logical volume without name in {}",
                        vg.id
                    )));
                };
                tracing::debug!("Adding lv {} to vg {}: size={}", name, vg.id, volume.size);
                let device = self
                    .scheme
                    .add_lv(LogicalVolume::new(name, vg.id.as_str(), volume.size))
                    .device_name();
                if let Some(mount) = normalize_mount(volume.mount.as_deref()) {
                    self.scheme.add_fs(
                        FileSystem::new(
                            device,
                            Some(&mount),
                            volume.file_system.as_deref().unwrap_or("xfs"),
                        )
                        .with_label(volume.disk_label.clone()),
                    )?;
                }
            }
        }

        self.scheme.elevate_keep_data();
        Ok(self.scheme)
    }

    fn add_disk(&mut self, disk: &KsDisk) -> Result<()> {
        let device = disk_dev(self.devices, disk)?;
        tracing::debug!("Processing disk {} as {}", disk.name, device);

        let parted = self.scheme.add_parted(&device, Label::Gpt)?;
        parted.install_bootloader = true;
        parted.add_partition(PartitionRequest::sized(BIOS_GRUB_SIZE).flag("bios_grub"));
        parted.add_partition(PartitionRequest::sized(UEFI_RESERVED_SIZE));

        for volume in &disk.volumes {
            if !volume.is_allocated() {
                continue;
            }
            if volume.is_ceph_journal() {
                self.add_ceph_journals(&device, volume)?;
                continue;
            }
            if !volume.is_partition_like() {
                continue;
            }

            let boot = volume.mounts_at("/boot");
            if boot && (self.boot_partition_done || !self.is_boot_disk(disk)) {
                tracing::debug!("No /boot partition needed on {}", disk.name);
                continue;
            }
            let partition = self
                .parted(&device)?
                .add_partition(PartitionRequest::sized(volume.size).keep_data(volume.keep_data));
            if let Some(guid) = volume
                .partition_guid
                .as_deref()
                .filter(|_| matches!(volume.kind, VolumeKind::Partition | VolumeKind::Ceph))
            {
                partition.set_guid(guid);
            }
            let Some(name) = partition.name.clone() else {
                return Err(SchemeError::wrong_scheme(format!(
                    "volume on {device} landed on an extended partition"
                )));
            };
            tracing::debug!("Partition {} for volume {:?}", name, volume.mount);
            if boot {
                self.boot_partition_done = true;
            }

            match volume.kind {
                VolumeKind::Partition | VolumeKind::Ceph => self.add_partition_fs(&name, volume)?,
                VolumeKind::Pv => self.attach_pv(&name, volume)?,
                VolumeKind::Raid => self.attach_raid(&name, volume)?,
                _ => {}
            }
        }

        if self.needs_configdrive
            && self.scheme.configdrive_device().is_none()
            && (disk.is_root_disk() || disk.is_os_disk())
        {
            tracing::debug!("Adding configdrive partition on disk {}", disk.name);
            self.parted(&device)?
                .add_partition(PartitionRequest::sized(CONFIGDRIVE_SIZE).configdrive());
        }
        Ok(())
    }

    fn parted(&mut self, device: &str) -> Result<&mut Parted> {
        self.scheme
            .parted_by_name_mut(device)
            .ok_or_else(|| SchemeError::wrong_scheme(format!("no partition table for {device}")))
    }

    fn add_ceph_journals(&mut self, device: &str, volume: &KsVolume) -> Result<()> {
        let (count, size) = self.journals.take(volume.size);
        if !matches!(volume.kind, VolumeKind::Partition | VolumeKind::Cephjournal) {
            return Ok(());
        }
        let parted = self.parted(device)?;
        for _ in 0..count {
            tracing::debug!("Adding ceph journal partition on {}: size={}", device, size);
            parted.add_partition(PartitionRequest::sized(size).guid(volume.partition_guid.clone()));
        }
        Ok(())
    }

    fn add_partition_fs(&mut self, name: &str, volume: &KsVolume) -> Result<()> {
        let fs_type = volume.file_system.as_deref().filter(|fs| *fs != "none");
        let mount = normalize_mount(volume.mount.as_deref());
        if fs_type.is_none() && mount.is_none() {
            return Ok(());
        }
        self.scheme.add_fs(
            FileSystem::new(name, mount.as_deref(), fs_type.unwrap_or("xfs"))
                .with_label(volume.disk_label.clone()),
        )?;
        if mount.as_deref() == Some("/boot") {
            self.boot_fs_done = true;
        }
        Ok(())
    }

    fn attach_pv(&mut self, name: &str, volume: &KsVolume) -> Result<()> {
        let Some(vg) = volume.vg.as_deref() else {
            return Err(SchemeError::WrongInputData(format!(
                "physical volume {name} has no volume group"
            )));
        };
        let lvm_meta_size = volume.lvm_meta_size.unwrap_or(DEFAULT_LVM_META_SIZE);
        if lvm_meta_size < MIN_LVM_META_SIZE {
            return Err(SchemeError::wrong_scheme(format!(
                "lvm metadata size {lvm_meta_size} of {name} is too small"
            )));
        }
        // Two metadata copies plus room for extent alignment.
        let metadatasize = (lvm_meta_size - 8) / 2;
        tracing::debug!("Creating pv {} in vg {}: metadatasize={}", name, vg, metadatasize);
        self.scheme.vg_attach_by_name(name, vg, metadatasize, 2);
        Ok(())
    }

    fn attach_raid(&mut self, name: &str, volume: &KsVolume) -> Result<()> {
        match volume.mount.as_deref() {
            Some("/boot") if !self.boot_fs_done => {
                self.scheme.add_fs(
                    FileSystem::new(name, Some("/boot"), volume.file_system.as_deref().unwrap_or("ext2"))
                        .with_label(volume.disk_label.clone()),
                )?;
                self.boot_fs_done = true;
            }
            Some(mount) if mount != "none" && mount != "/boot" => {
                tracing::debug!(
                    "Attaching {} to RAID mounted at {} (metadata {})",
                    name,
                    mount,
                    self.md_metadata
                );
                let request = MdRequest {
                    metadata: Some(self.md_metadata.to_string()),
                    fs_type: Some(volume.file_system.clone().unwrap_or_else(|| "xfs".to_string())),
                    fs_label: volume.disk_label.clone(),
                    ..MdRequest::default()
                };
                self.scheme.md_attach_by_mount(name, mount, false, &request)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Partition scheme for `pm_data` on a node exposing `devices`.
pub fn partition_scheme(
    pm_data: &PmData,
    devices: &[BlockDevice],
    options: &LayoutOptions,
    legacy_grub: bool,
) -> Result<PartitionScheme> {
    Partitioner::new(pm_data, devices, options.needs_configdrive, legacy_grub)?.build()
}

/// One image per placement entry, targeting the filesystem at its mount.
pub fn image_scheme(
    image_data: &BTreeMap<String, ImageData>,
    scheme: &PartitionScheme,
    metadata: &ImageMetadata,
) -> Result<ImageScheme> {
    let mut images = ImageScheme::new();
    for (mount, data) in image_data {
        let fs = scheme.fs_by_mount(mount).ok_or_else(|| {
            SchemeError::wrong_scheme(format!("no file system for image mounted at {mount}"))
        })?;
        let record = metadata.image_by_container_name(uri_basename(&data.uri));
        tracing::debug!(
            "Adding image for {}: uri={} format={} container={}",
            mount,
            data.uri,
            data.format,
            data.container
        );
        images.add_image(Image {
            uri: data.uri.clone(),
            target_device: fs.device.clone(),
            format: data.format.clone(),
            container: data.container,
            size: record.and_then(|r| r.raw_size),
            md5: record.and_then(|r| r.raw_md5.clone()),
            img_tmp_file: None,
        });
    }
    Ok(images)
}

/// Location of the metadata record published next to the root image.
pub fn metadata_uri(data: &ProvisionData) -> Option<String> {
    data.ks_meta
        .image_data
        .get("/")
        .map(|root| image_metadata_uri(&root.uri))
}

/// Plan for a node described by the orchestrator's volume manager.
#[derive(Debug, Clone)]
pub struct Nailgun {
    pub(crate) os: OperatingSystem,
    pub(crate) grub: Grub,
    pub(crate) partition_scheme: PartitionScheme,
    pub(crate) image_scheme: ImageScheme,
    pub(crate) configdrive_scheme: ConfigDriveScheme,
    pub(crate) metadata_uri: Option<String>,
}

impl Nailgun {
    pub fn new(
        data: &ProvisionData,
        devices: &[BlockDevice],
        metadata: &ImageMetadata,
        options: &LayoutOptions,
    ) -> Result<Self> {
        let os = system::operating_system(data, metadata);
        let legacy = os.matches_any(&options.legacy_grub_releases);
        let scheme = partition_scheme(data.pm_data(), devices, options, legacy)?;
        Self::assemble(data, metadata, options, os, scheme)
    }

    /// Everything but the partition scheme derives the same way for every
    /// node-driven flavor.
    pub(crate) fn assemble(
        data: &ProvisionData,
        metadata: &ImageMetadata,
        options: &LayoutOptions,
        os: OperatingSystem,
        partition_scheme: PartitionScheme,
    ) -> Result<Self> {
        let grub = system::grub(data, &os, &options.legacy_grub_releases);
        let image_scheme = image_scheme(&data.ks_meta.image_data, &partition_scheme, metadata)?;
        Ok(Self {
            os,
            grub,
            partition_scheme,
            image_scheme,
            configdrive_scheme: system::configdrive_scheme(data),
            metadata_uri: metadata_uri(data),
        })
    }
}
