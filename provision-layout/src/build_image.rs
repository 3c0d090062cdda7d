// SPDX-License-Identifier: GPL-3.0-only

//! Image build plans
//!
//! Building an image never touches real disks: each filesystem sits on a
//! loop placeholder that gets its device once a sparse file is attached.

use std::path::{Path, PathBuf};

use provision_types::{
    FileSystem, Image, ImageScheme, OperatingSystem, PartitionScheme, Result, SchemeError,
    uri_basename,
};

use crate::input::BuildImageData;

/// Packages installed when the build request does not name any.
pub const DEFAULT_PACKAGES: &[&str] = &[
    "acl",
    "anacron",
    "bash-completion",
    "bridge-utils",
    "bsdmainutils",
    "cloud-init",
    "curl",
    "debconf-utils",
    "gdisk",
    "grub-pc",
    "linux-firmware",
    "linux-image-generic-lts-trusty",
    "lvm2",
    "mdadm",
    "ntp",
    "openssh-client",
    "openssh-server",
    "telnet",
    "ubuntu-minimal",
    "ubuntu-standard",
    "uuid-runtime",
    "vim",
    "virt-what",
    "vlan",
];

#[derive(Debug, Clone)]
pub struct BuildImage {
    pub(crate) os: OperatingSystem,
    pub(crate) partition_scheme: PartitionScheme,
    pub(crate) image_scheme: ImageScheme,
    pub(crate) output: PathBuf,
    pub(crate) metadata_uri: String,
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

impl BuildImage {
    pub fn new(data: &BuildImageData) -> Result<Self> {
        let output = PathBuf::from(&data.output);
        let mut partition_scheme = PartitionScheme::new();
        let mut image_scheme = ImageScheme::new();
        let mut metadata_uri = None;

        for (mount, image) in &data.image_data {
            let filename = uri_basename(&image.uri);
            if filename.is_empty() {
                return Err(SchemeError::WrongInputData(format!(
                    "image uri {} has no file name",
                    image.uri
                )));
            }
            let device = partition_scheme.add_loop();
            tracing::debug!("Image {} for {} goes to {:?}", filename, mount, device);

            image_scheme.add_image(Image {
                uri: file_uri(&output.join(filename)),
                target_device: device.into(),
                format: image.format.clone(),
                container: image.container,
                size: None,
                md5: None,
                img_tmp_file: None,
            });
            partition_scheme.add_fs(FileSystem::new(device, Some(mount), &image.format))?;

            if mount == "/" {
                let stem = filename.split('.').next().unwrap_or(filename);
                metadata_uri = Some(file_uri(&output.join(format!("{stem}.yaml"))));
            }
        }

        let metadata_uri = metadata_uri
            .ok_or_else(|| SchemeError::WrongInputData("no image for / given".to_string()))?;

        let mut os = OperatingSystem::release("ubuntu", 14, 4);
        os.repos = data.repos.clone();
        os.packages = match &data.packages {
            Some(packages) => packages.clone(),
            None => DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
        };

        Ok(Self {
            os,
            partition_scheme,
            image_scheme,
            output,
            metadata_uri,
        })
    }

    /// Directory receiving packed images and the metadata record.
    pub fn output(&self) -> &Path {
        &self.output
    }
}
