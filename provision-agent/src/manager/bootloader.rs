// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::Path;

use provision_contracts::{ProvisionError, Result};
use provision_types::{Grub, SchemeError};

use super::{Manager, finish};
use crate::target;

const BY_ID_PREFIX: &str = "/dev/disk/by-id/";

impl Manager {
    pub fn do_bootloader(&self) -> Result<()> {
        tracing::info!("--- Installing bootloader (do_bootloader) ---");
        let Some(grub) = self.driver.grub() else {
            tracing::info!("{} driver installs no bootloader", self.driver.kind());
            return Ok(());
        };

        let chroot = self.config.target_root.as_path();
        std::fs::create_dir_all(chroot).map_err(|e| ProvisionError::io(chroot, e))?;

        let installed = self
            .mount_target(chroot, true, true)
            .and_then(|()| self.install_bootloader(chroot, grub.clone()));
        finish(installed, self.umount_target(chroot, true))?;
        tracing::info!("--- Installing bootloader END (do_bootloader) ---");
        Ok(())
    }

    fn install_bootloader(&self, chroot: &Path, mut grub: Grub) -> Result<()> {
        let scheme = self.driver.partition_scheme();

        let mut uuids = HashMap::new();
        for fs in scheme.fss.iter().filter(|fs| fs.mount.is_some()) {
            let device = scheme.resolve_device(&fs.device).ok_or_else(|| {
                SchemeError::wrong_scheme(format!("device {} is not attached", fs.device))
            })?;
            uuids.insert(fs.device.clone(), self.tools.fs.probe_uuid(&device)?);
        }
        let root_uuid = scheme
            .fs_by_mount("/")
            .and_then(|root| uuids.get(&root.device))
            .cloned()
            .ok_or_else(|| SchemeError::wrong_scheme("root file system UUID not found"))?;

        self.override_lvm_for_multipath(chroot)?;

        let guessed = self.tools.bootloader.guess_version(chroot)?;
        if guessed != grub.version {
            tracing::warn!(
                "Grub version differs from which the operating system should have by default. \
                 Found version in image: {}",
                guessed
            );
            grub.version = guessed;
        }

        if self.config.use_uuid_root {
            grub.append_kernel_params(&format!("root=UUID={root_uuid}"));
        }

        let boot_device = scheme.boot_device(grub.version)?;
        let install_devices: Vec<String> = scheme
            .parteds
            .iter()
            .filter(|parted| parted.install_bootloader)
            .map(|parted| parted.name.clone())
            .collect();
        tracing::debug!(
            "Boot device {}, installing grub {} on {:?}",
            boot_device,
            grub.version,
            install_devices
        );

        if grub.version == 1 {
            let kernel = match &grub.kernel_name {
                Some(kernel) => kernel.clone(),
                None => self
                    .tools
                    .bootloader
                    .guess_kernel(chroot, &grub.kernel_regexp)?,
            };
            let initrd = match &grub.initrd_name {
                Some(initrd) => initrd.clone(),
                None => self
                    .tools
                    .bootloader
                    .guess_initrd(chroot, &grub.initrd_regexp)?,
            };
            self.tools.bootloader.grub1_cfg(
                chroot,
                &kernel,
                &initrd,
                &grub.kernel_params,
                self.config.grub_timeout,
            )?;
            self.tools
                .bootloader
                .grub1_install(chroot, &install_devices, &boot_device)?;
        } else {
            self.tools
                .bootloader
                .grub2_cfg(chroot, &grub.kernel_params, self.config.grub_timeout)?;
            self.tools.bootloader.grub2_install(chroot, &install_devices)?;
        }

        if let Some(configdrive) = self.driver.configdrive_scheme() {
            if self.config.fix_udev_net_rules {
                target::write_udev_net_rules(chroot, &configdrive.udev_rules())?;
            }
            if self.config.prepare_configdrive {
                target::write_admin_nic(chroot, &configdrive.common)?;
            }
        }

        let fstab = target::render_fstab(&scheme.fss, &uuids)?;
        target::write_fstab(chroot, &fstab)
    }

    /// Keep LVM inside the target from seeing multipath legs as duplicate
    /// physical volumes: only plain disks' by-id links and `/dev/mapper`
    /// names are accepted.
    fn override_lvm_for_multipath(&self, chroot: &Path) -> Result<()> {
        let mut any_multipath = false;
        let mut whitelist = Vec::new();
        for parted in &self.driver.partition_scheme().parteds {
            if self.tools.host.is_multipath_device(&parted.name)? {
                any_multipath = true;
                continue;
            }
            for link in self.tools.host.device_links(&parted.name)? {
                if link.starts_with(BY_ID_PREFIX) {
                    whitelist.push(format!("a|^{link}(p)?(-part)?[0-9]*|"));
                }
            }
        }
        if !any_multipath {
            return Ok(());
        }

        tracing::info!("Multipath devices found, overriding LVM device filter in target");
        let devices = self.config.mpath_lvm_devices(whitelist);
        self.tools
            .logical
            .override_lvm_config(chroot, &devices, &self.config.lvm_conf_path, true)
    }
}
