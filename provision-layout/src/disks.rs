// SPDX-License-Identifier: GPL-3.0-only

//! Resolving declared disks against the live block device inventory

use provision_types::{BlockDevice, Result, SchemeError};

use crate::input::{KsDisk, PmData};

/// True when `device` is the disk declared by `disk`.
///
/// With aliases declared, one of them has to be a shared by-id link. Without
/// aliases the disk id is looked up among the device links instead.
pub fn match_device(device: &BlockDevice, disk: &KsDisk) -> bool {
    if !disk.extra.is_empty() {
        return disk
            .extra
            .iter()
            .map(|alias| format!("/dev/{alias}"))
            .any(|link| link.starts_with("/dev/disk/by-id") && device.has_link(&link));
    }
    device.has_link(&format!("/dev/{}", disk.id))
}

/// Device path of `disk`.
///
/// Link matching wins unless it is ambiguous while the plain name matches a
/// single device; udev is known to hand out identical ids for distinct NVMe
/// drives.
pub fn disk_dev(devices: &[BlockDevice], disk: &KsDisk) -> Result<String> {
    let matched: Vec<&str> = devices
        .iter()
        .filter(|device| match_device(device, disk))
        .map(|device| device.device.as_str())
        .collect();
    let by_name = format!("/dev/{}", disk.name);
    let fallback: Vec<&str> = devices
        .iter()
        .filter(|device| device.device == by_name)
        .map(|device| device.device.as_str())
        .collect();

    let found = if matched.len() > 1 && fallback.len() == 1 {
        fallback
    } else if matched.is_empty() {
        fallback
    } else {
        matched
    };

    match found.as_slice() {
        [device] => Ok((*device).to_string()),
        _ => Err(SchemeError::DiskNotFound(disk.name.clone())),
    }
}

/// Disks eligible to carry `/boot`.
///
/// NVMe drives are never eligible: grub is installed in BIOS mode and
/// cannot reach them at boot.
pub fn boot_disks(pm_data: &PmData) -> Result<Vec<&KsDisk>> {
    let disks: Vec<&KsDisk> = pm_data.ks_disks().collect();
    let suitable: Vec<&KsDisk> = disks
        .iter()
        .copied()
        .filter(|disk| !disk.is_nvme() && disk.has_boot_volume())
        .collect();

    // No separate /boot at all: the bootloader goes where the root image lands.
    if suitable.is_empty() && !disks.iter().any(|disk| disk.has_boot_volume()) {
        return Ok(disks
            .into_iter()
            .filter(|disk| disk.is_root_disk() && !disk.is_nvme())
            .collect());
    }

    let md_boot: Vec<&KsDisk> = disks
        .iter()
        .copied()
        .filter(|disk| disk.name.starts_with("md") && disk.is_os_disk())
        .filter(|disk| suitable.iter().any(|s| s.name == disk.name))
        .collect();
    let candidates = if md_boot.is_empty() { suitable } else { md_boot };

    let bootable: Vec<&KsDisk> = candidates.iter().copied().filter(|d| d.bootable).collect();
    match bootable.len() {
        0 => Ok(candidates),
        1 => Ok(bootable),
        _ => Err(SchemeError::wrong_scheme(format!(
            "more than one bootable disk found: {}",
            bootable
                .iter()
                .map(|disk| disk.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
