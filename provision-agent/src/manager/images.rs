// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::path::PathBuf;

use provision_contracts::{ProvisionError, Result};
use provision_types::{Image, SchemeError};

use super::{Manager, finish};
use crate::cloud_init;
use crate::target::{make_temp_dir, relocate_nested_files, remove_mountpoint};

impl Manager {
    pub fn do_copyimage(&self) -> Result<()> {
        tracing::info!("--- Copying images (do_copyimage) ---");
        for image in &self.driver.image_scheme().images {
            self.copy_one(image)?;
        }

        if !self.config.use_configdrive {
            self.inject_cloud_init()?;
        }

        self.move_files_to_their_places(true)?;
        tracing::info!("--- Copying images END (do_copyimage) ---");
        Ok(())
    }

    fn copy_one(&self, image: &Image) -> Result<()> {
        let target = self
            .driver
            .partition_scheme()
            .resolve_device(&image.target_device)
            .ok_or_else(|| ProvisionError::WrongDevice(image.target_device.to_string()))?;

        if !self.tools.host.path_exists(&target) || !self.tools.host.is_block_device(&target) {
            tracing::error!("Image target {} is not a block device", target);
            return Err(ProvisionError::WrongDevice(target));
        }

        tracing::info!("Processing image {} -> {}", image.uri, target);
        let written = self
            .tools
            .images
            .copy_image(&image.uri, image.container, &target)?;
        tracing::debug!("{} bytes written to {}", written, target);

        match image.expected_checksum() {
            Some((size, expected)) => {
                let actual = self.tools.images.calculate_md5(&target, size)?;
                if actual != expected {
                    tracing::error!(
                        "Image checksum mismatch on {}: expected {}, got {}",
                        target,
                        expected,
                        actual
                    );
                    return Err(ProvisionError::ImageChecksumMismatch {
                        device: target,
                        expected: expected.to_string(),
                        actual,
                    });
                }
                tracing::debug!("Checksum of {} matches", target);
            }
            None => {
                tracing::debug!("Skipping image checksum comparison for {}", target);
            }
        }

        if image.is_growable() {
            tracing::debug!("Extending {} file system on {}", image.format, target);
            self.tools.fs.extend_fs(&image.format, &target)?;
        }
        Ok(())
    }

    /// Without a configdrive partition, cloud-init reads its seed from the
    /// root filesystem itself.
    fn inject_cloud_init(&self) -> Result<()> {
        let Some(scheme) = self.driver.configdrive_scheme() else {
            return Ok(());
        };
        let chroot = make_temp_dir(&self.config.tmp_path, "nocloud-")?;
        tracing::debug!("Injecting cloud-init seed through {}", chroot.display());

        let injected = self
            .mount_target(&chroot, false, false)
            .and_then(|()| cloud_init::write_nocloud_seed(&chroot, scheme));
        let result = finish(injected, self.umount_target(&chroot, false));
        remove_mountpoint(&chroot);
        result
    }

    /// Move files that images baked into a parent filesystem onto the
    /// filesystem mounted below it.
    pub fn move_files_to_their_places(&self, remove_src: bool) -> Result<()> {
        let mut mounts = BTreeMap::new();
        let moved = self.mount_target_flat(&mut mounts).and_then(|()| {
            relocate_nested_files(&mounts, remove_src, |src, dst| {
                self.tools.images.sync_tree(src, dst)
            })
        });
        finish(moved, self.umount_target_flat(&mounts))
    }

    /// Mount every filesystem into its own temporary directory, ignoring the
    /// real hierarchy.
    fn mount_target_flat(&self, mounts: &mut BTreeMap<String, PathBuf>) -> Result<()> {
        let scheme = self.driver.partition_scheme();
        for fs in scheme.fss_with_mountpoints() {
            let Some(mount) = fs.mountpoint() else {
                continue;
            };
            let device = scheme.resolve_device(&fs.device).ok_or_else(|| {
                SchemeError::wrong_scheme(format!("device {} is not attached", fs.device))
            })?;
            let dir = make_temp_dir(&self.config.tmp_path, "flat-")?;
            mounts.insert(mount.to_string(), dir.clone());
            self.tools.fs.mount_fs(&fs.fs_type, &device, &dir)?;
        }
        Ok(())
    }

    fn umount_target_flat(&self, mounts: &BTreeMap<String, PathBuf>) -> Result<()> {
        let mut first_error = None;
        for dir in mounts.values() {
            if let Err(e) = self.tools.fs.umount_fs(dir) {
                tracing::warn!("Failed to umount {}: {}", dir.display(), e);
                first_error.get_or_insert(e);
                continue;
            }
            remove_mountpoint(dir);
        }
        first_error.map_or(Ok(()), Err)
    }
}
