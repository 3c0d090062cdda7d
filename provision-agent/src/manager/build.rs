// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use provision_contracts::{ProvisionError, Result, StopSignal};
use provision_layout::render_image_metadata;
use provision_types::{
    DeviceRef, ImageMetadata, ImageRecord, Repo, SchemeError, uri_basename,
};

use super::{Manager, log_cleanup};
use crate::target::{make_temp_dir, remove_mountpoint, under_chroot};

const FILE_SCHEME: &str = "file://";

fn local_path(uri: &str) -> Result<PathBuf> {
    uri.strip_prefix(FILE_SCHEME)
        .map(PathBuf::from)
        .ok_or_else(|| {
            SchemeError::WrongInputData(format!("image build output {uri} is not a local file"))
                .into()
        })
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .map_err(|e| ProvisionError::io(path, e))?
        .len())
}

fn repo_record(repo: &Repo) -> BTreeMap<String, String> {
    let mut record = BTreeMap::from([
        ("name".to_string(), repo.name.clone()),
        ("type".to_string(), "deb".to_string()),
        ("uri".to_string(), repo.uri.clone()),
    ]);
    if let Some(suite) = &repo.suite {
        record.insert("suite".to_string(), suite.clone());
    }
    if let Some(section) = &repo.section {
        record.insert("section".to_string(), section.clone());
    }
    if let Some(priority) = repo.priority {
        record.insert("priority".to_string(), priority.to_string());
    }
    record
}

impl Manager {
    pub fn do_build_image(&mut self) -> Result<()> {
        tracing::info!("--- Building image (do_build_image) ---");
        let Some(output) = self.driver.build_output().map(Path::to_path_buf) else {
            return Err(SchemeError::WrongInputData(format!(
                "{} driver does not build images",
                self.driver.kind()
            ))
            .into());
        };

        let mut outputs = Vec::new();
        for image in &self.driver.image_scheme().images {
            outputs.push(local_path(&image.uri)?);
        }
        if outputs.iter().all(|path| path.exists()) {
            tracing::info!("All necessary images are available. Nothing needs to be done.");
            return Ok(());
        }
        std::fs::create_dir_all(&output).map_err(|e| ProvisionError::io(&output, e))?;

        let chroot = make_temp_dir(&self.config.image_build_dir, "provision-chroot-")?;
        tracing::debug!("Building image in {}", chroot.display());
        let built = self.build_into(&chroot);
        self.destroy_chroot(&chroot);
        built?;
        tracing::info!("--- Building image END (do_build_image) ---");
        Ok(())
    }

    fn build_into(&mut self, chroot: &Path) -> Result<()> {
        self.attach_image_files()?;

        self.mount_target(chroot, false, false)?;
        let proc = under_chroot(chroot, "/proc");
        std::fs::create_dir_all(&proc).map_err(|e| ProvisionError::io(&proc, e))?;
        self.tools.fs.mount_bind(chroot, "/proc")?;

        let os = self.driver.operating_system().clone();
        tracing::info!("Installing operating system into {}", chroot.display());
        self.tools.installer.install(chroot, &os)?;

        if !self.stop_chrooted_processes(chroot) {
            tracing::error!("Processes still running in {}", chroot.display());
            return Err(ProvisionError::UnexpectedProcess(
                chroot.display().to_string(),
            ));
        }

        self.tools.fs.umount_fs(&proc)?;
        self.umount_target(chroot, false)?;

        let records = self.pack_images()?;
        self.write_metadata(records)
    }

    /// Back every image target with a sparse file on a loop device and
    /// format it.
    fn attach_image_files(&mut self) -> Result<()> {
        let (scheme, images) = self.driver.schemes_mut();
        for image in &mut images.images {
            let DeviceRef::Loop { loop_id } = image.target_device else {
                return Err(SchemeError::WrongInputData(format!(
                    "image target {} is not a loop device",
                    image.target_device
                ))
                .into());
            };

            let file = self.tools.host.create_sparse_file(
                &self.config.image_build_dir,
                &self.config.image_build_suffix,
                self.config.sparse_file_size,
            )?;
            image.img_tmp_file = Some(file.clone());

            let device = self.tools.host.attach_loop(&file)?;
            scheme.assign_loop(loop_id, &device)?;
            tracing::debug!("{} attached to {}", file.display(), device);

            let (options, label) = scheme
                .fs_by_device(&image.target_device)
                .map(|fs| (fs.options.clone(), fs.label.clone()))
                .unwrap_or_default();
            self.tools
                .fs
                .make_fs(&image.format, &options, label.as_deref(), &device)?;
            if image.format == "ext4" {
                self.tools.fs.set_journal(&device, false)?;
            }
        }
        Ok(())
    }

    fn stop_chrooted_processes(&self, chroot: &Path) -> bool {
        for signal in [StopSignal::Term, StopSignal::Kill] {
            if self.tools.host.stop_chrooted_processes(chroot, signal) {
                return true;
            }
            tracing::debug!("Processes survived {:?} in {}", signal, chroot.display());
        }
        false
    }

    /// Detach each loop device and pack its file into the output directory.
    fn pack_images(&self) -> Result<Vec<ImageRecord>> {
        let scheme = self.driver.partition_scheme();
        let mut records = Vec::new();

        for image in &self.driver.image_scheme().images {
            let device = scheme.resolve_device(&image.target_device).ok_or_else(|| {
                SchemeError::wrong_scheme(format!("device {} is not attached", image.target_device))
            })?;
            if image.format == "ext4" {
                self.tools.fs.set_journal(&device, true)?;
            }
            self.tools.host.detach_loop(&device)?;

            let raw = image.img_tmp_file.as_deref().ok_or_else(|| {
                SchemeError::wrong_scheme(format!("no backing file for {device}"))
            })?;
            let raw_size = file_size(raw)?;
            let raw_md5 = self
                .tools
                .images
                .calculate_md5(&raw.display().to_string(), raw_size)?;

            let packed = local_path(&image.uri)?;
            tracing::info!("Packing {} into {}", raw.display(), packed.display());
            self.tools.images.containerize(raw, image.container, &packed)?;
            let container_size = file_size(&packed)?;
            let container_md5 = self
                .tools
                .images
                .calculate_md5(&packed.display().to_string(), container_size)?;

            records.push(ImageRecord {
                container_name: uri_basename(&image.uri).to_string(),
                raw_size: Some(raw_size),
                raw_md5: Some(raw_md5),
                raw_name: None,
                container_md5: Some(container_md5),
                container_size: Some(container_size),
                container: Some(image.container),
                format: Some(image.format.clone()),
            });
        }
        Ok(records)
    }

    fn write_metadata(&self, images: Vec<ImageRecord>) -> Result<()> {
        let os = self.driver.operating_system();
        let metadata = ImageMetadata {
            images,
            os: os.to_release(),
            repos: os.repos.iter().map(repo_record).collect(),
            packages: os.packages.clone(),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };
        let rendered = render_image_metadata(&metadata)
            .map_err(|e| ProvisionError::serialization("image metadata", e))?;

        let uri = self.driver.bootstrap_metadata().ok_or_else(|| {
            SchemeError::WrongInputData("no location for the image metadata".to_string())
        })?;
        let path = local_path(uri)?;
        tracing::info!("Writing image metadata to {}", path.display());
        std::fs::write(&path, rendered).map_err(|e| ProvisionError::io(&path, e))
    }

    /// Best-effort teardown of a build chroot. Nothing here fails the build.
    pub fn destroy_chroot(&self, chroot: &Path) {
        tracing::debug!("Destroying chroot {}", chroot.display());
        if !self.stop_chrooted_processes(chroot) {
            tracing::warn!(
                "Some processes are still running in {}, continuing teardown",
                chroot.display()
            );
        }

        let proc_released = self.tools.fs.umount_fs(&under_chroot(chroot, "/proc"));
        let target_released = self.umount_target(chroot, false);
        let unmounted = proc_released.is_ok() && target_released.is_ok();
        log_cleanup("umount proc", proc_released);
        log_cleanup("umount target", target_released);

        let scheme = self.driver.partition_scheme();
        for image in &self.driver.image_scheme().images {
            if let Some(device) = scheme.resolve_device(&image.target_device) {
                log_cleanup("detach loop device", self.tools.host.detach_loop(&device));
            }
            if let Some(file) = &image.img_tmp_file
                && file.exists()
                && let Err(e) = std::fs::remove_file(file)
            {
                tracing::warn!("Failed to remove {}: {}", file.display(), e);
            }
        }

        if unmounted {
            if let Err(e) = std::fs::remove_dir_all(chroot) {
                tracing::warn!("Failed to remove {}: {}", chroot.display(), e);
            }
        } else {
            // something may still be mounted below, never recurse into it
            remove_mountpoint(chroot);
        }
    }
}
