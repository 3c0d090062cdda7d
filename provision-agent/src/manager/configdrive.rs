// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use provision_contracts::{ProvisionError, Result};
use provision_types::{ConfigDriveScheme, Container, Image, SchemeError};

use super::{Manager, finish};
use crate::cloud_init;
use crate::target::{make_temp_dir, remove_mountpoint};

const CONFIGDRIVE_FS: &str = "ext2";
const CONFIGDRIVE_FS_OPTIONS: &str = "-b 4096 -F";
const CONFIGDRIVE_LABEL: &str = "config-2";

impl Manager {
    pub fn do_configdrive(&mut self) -> Result<()> {
        tracing::info!("--- Creating configdrive (do_configdrive) ---");
        let Some(scheme) = self.driver.configdrive_scheme().cloned() else {
            tracing::info!("No configdrive data for {} driver", self.driver.kind());
            return Ok(());
        };

        if self.config.prepare_configdrive {
            self.build_configdrive(&scheme)?;
        }
        if self.config.prepare_configdrive || self.config.config_drive_path.exists() {
            self.add_configdrive_image()?;
        } else {
            tracing::warn!(
                "Configdrive image {} is missing, nothing to write",
                self.config.config_drive_path.display()
            );
        }
        tracing::info!("--- Creating configdrive END (do_configdrive) ---");
        Ok(())
    }

    fn configdrive_device(&self) -> Result<String> {
        self.driver
            .partition_scheme()
            .configdrive_device()
            .map(str::to_string)
            .ok_or_else(|| SchemeError::wrong_scheme("configdrive partition not found").into())
    }

    /// Render the seed and pack it into an ext2 image sized to the
    /// configdrive partition.
    fn build_configdrive(&self, scheme: &ConfigDriveScheme) -> Result<()> {
        let device = self.configdrive_device()?;
        let seed_dir = make_temp_dir(&self.config.tmp_path, "configdrive-seed-")?;

        let packed = cloud_init::write_configdrive_seed(&seed_dir, scheme)
            .and_then(|()| self.pack_configdrive(&seed_dir, &device));

        if let Err(e) = std::fs::remove_dir_all(&seed_dir) {
            tracing::warn!("Failed to remove {}: {}", seed_dir.display(), e);
        }
        packed
    }

    fn pack_configdrive(&self, seed_dir: &Path, device: &str) -> Result<()> {
        let image_path = &self.config.config_drive_path;
        let size = self.tools.host.block_device_size(device)?;
        tracing::debug!(
            "Creating {} byte configdrive image {}",
            size,
            image_path.display()
        );

        if let Some(parent) = image_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        let file = std::fs::File::create(image_path)
            .map_err(|e| ProvisionError::io(image_path, e))?;
        file.set_len(size)
            .map_err(|e| ProvisionError::io(image_path, e))?;
        drop(file);

        let image = image_path.display().to_string();
        self.tools.fs.make_fs(
            CONFIGDRIVE_FS,
            CONFIGDRIVE_FS_OPTIONS,
            Some(CONFIGDRIVE_LABEL),
            &image,
        )?;

        let mount_dir = make_temp_dir(&self.config.tmp_path, "configdrive-")?;
        let copied = self
            .tools
            .fs
            .mount_fs(CONFIGDRIVE_FS, &image, &mount_dir)
            .and_then(|()| self.tools.images.sync_tree(seed_dir, &mount_dir));
        let result = finish(copied, self.tools.fs.umount_fs(&mount_dir));
        remove_mountpoint(&mount_dir);
        result
    }

    /// Register the configdrive image so the copy stage writes it.
    fn add_configdrive_image(&mut self) -> Result<()> {
        let device = self.configdrive_device()?;
        let path = &self.config.config_drive_path;
        let image = path.display().to_string();

        let size = std::fs::metadata(path)
            .map_err(|e| ProvisionError::io(path, e))?
            .len();
        let md5 = self.tools.images.calculate_md5(&image, size)?;
        let format = self
            .tools
            .fs
            .probe_fs_type(&image)?
            .unwrap_or_else(|| CONFIGDRIVE_FS.to_string());

        tracing::debug!("Configdrive image {} goes to {}", image, device);
        self.driver.image_scheme_mut().add_image(Image {
            uri: format!("file://{image}"),
            target_device: device.into(),
            format,
            container: Container::Raw,
            size: Some(size),
            md5: Some(md5),
            img_tmp_file: None,
        });
        Ok(())
    }
}
