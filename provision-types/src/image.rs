// SPDX-License-Identifier: GPL-3.0-only

//! Image scheme and the per-image metadata record
//!
//! The metadata record is written next to a built image and read back by the
//! translator to learn each image's raw size and checksum.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::filesystem::DeviceRef;
use crate::os::OsRelease;

/// Image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Raw,
    Gzip,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Gzip => f.write_str("gzip"),
        }
    }
}

/// Formats whose filesystem can be grown after the image is written.
pub const GROWABLE_FORMATS: [&str; 4] = ["ext2", "ext3", "ext4", "xfs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub uri: String,
    pub target_device: DeviceRef,
    pub format: String,
    pub container: Container,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5: Option<String>,
    /// Scratch file backing the target while an image is being built.
    #[serde(skip)]
    pub img_tmp_file: Option<PathBuf>,
}

impl Image {
    pub fn is_growable(&self) -> bool {
        GROWABLE_FORMATS.contains(&self.format.as_str())
    }

    /// Size and checksum, when both are known.
    pub fn expected_checksum(&self) -> Option<(u64, &str)> {
        match (self.size, self.md5.as_deref()) {
            (Some(size), Some(md5)) if size > 0 && !md5.is_empty() => Some((size, md5)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageScheme {
    #[serde(default)]
    pub images: Vec<Image>,
}

impl ImageScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&mut self, image: Image) -> &mut Image {
        self.images.push(image);
        let last = self.images.len() - 1;
        &mut self.images[last]
    }

    pub fn targets(&self, device: &DeviceRef) -> bool {
        self.images.iter().any(|image| &image.target_device == device)
    }
}

/// One image entry of the metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub container_name: String,
    #[serde(default)]
    pub raw_size: Option<u64>,
    #[serde(default)]
    pub raw_md5: Option<String>,
    #[serde(default)]
    pub raw_name: Option<String>,
    #[serde(default)]
    pub container_md5: Option<String>,
    #[serde(default)]
    pub container_size: Option<u64>,
    #[serde(default)]
    pub container: Option<Container>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Per-node metadata record produced alongside a built image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub os: Option<OsRelease>,
    #[serde(default)]
    pub repos: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ImageMetadata {
    pub fn image_by_container_name(&self, name: &str) -> Option<&ImageRecord> {
        self.images.iter().find(|image| image.container_name == name)
    }
}

/// Last path segment of a URI, ignoring query and fragment.
pub fn uri_basename(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit('/').next().unwrap_or(path)
}

/// Location of the metadata record published next to a root image:
/// `.../name.img.gz` maps to `.../name.yaml`.
pub fn image_metadata_uri(root_uri: &str) -> String {
    let basename = uri_basename(root_uri);
    let stem = basename.split('.').next().unwrap_or(basename);
    let path = root_uri.split(['?', '#']).next().unwrap_or(root_uri);
    let prefix = &path[..path.len() - basename.len()];
    format!("{prefix}{stem}.yaml")
}
