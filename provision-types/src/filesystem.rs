// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemeError};

pub const SWAP_MOUNT: &str = "swap";
pub const DEFAULT_FS_TYPE: &str = "xfs";

/// Handle to a [`Loop`] placeholder owned by a [`crate::PartitionScheme`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopId(pub usize);

/// Loop device placeholder.
///
/// Created by the translator before any loop device exists. The concrete
/// device name is assigned once, when a backing file gets attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loop {
    pub name: Option<String>,
}

impl Loop {
    pub fn assign(&mut self, name: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.name {
            return Err(SchemeError::LoopAlreadyAssigned(existing.clone()));
        }
        self.name = Some(name.into());
        Ok(())
    }
}

/// Backing device of a filesystem or image target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Path(String),
    Loop { loop_id: LoopId },
}

impl DeviceRef {
    pub fn as_path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Loop { .. } => None,
        }
    }

    pub fn is_path(&self, path: &str) -> bool {
        self.as_path() == Some(path)
    }
}

impl From<&str> for DeviceRef {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for DeviceRef {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<LoopId> for DeviceRef {
    fn from(loop_id: LoopId) -> Self {
        Self::Loop { loop_id }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.write_str(path),
            Self::Loop { loop_id } => write!(f, "loop#{}", loop_id.0),
        }
    }
}

/// Filesystem to be created (or preserved) on a device.
///
/// `mount` is an absolute path, the `swap` sentinel, or `None` for
/// "format only".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystem {
    pub device: DeviceRef,
    #[serde(default)]
    pub mount: Option<String>,
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub keep_data: bool,
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_string()
}

impl FileSystem {
    pub fn new(device: impl Into<DeviceRef>, mount: Option<&str>, fs_type: &str) -> Self {
        Self {
            device: device.into(),
            mount: normalize_mount(mount),
            fs_type: fs_type.to_string(),
            options: String::new(),
            label: None,
            keep_data: false,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label.filter(|l| !l.is_empty());
        self
    }

    pub fn with_options(mut self, options: Option<String>) -> Self {
        self.options = options.unwrap_or_default();
        self
    }

    pub fn is_swap(&self) -> bool {
        self.mount.as_deref() == Some(SWAP_MOUNT)
    }

    /// Mount point usable for a real mount, excluding swap.
    pub fn mountpoint(&self) -> Option<&str> {
        self.mount.as_deref().filter(|m| *m != SWAP_MOUNT)
    }

    pub fn validate(&self) -> Result<()> {
        match self.mount.as_deref() {
            Some(mount) if mount != SWAP_MOUNT && !mount.starts_with('/') => {
                Err(SchemeError::WrongFsMount(mount.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Number of path segments below `/`, used to order nested mounts.
    pub fn depth(&self) -> usize {
        self.mount
            .as_deref()
            .map(|m| m.trim_end_matches('/').matches('/').count())
            .unwrap_or(0)
    }
}

/// Maps the `none` and empty-string spellings to "no mount".
pub fn normalize_mount(mount: Option<&str>) -> Option<String> {
    match mount {
        None | Some("") | Some("none") => None,
        Some(mount) => Some(mount.to_string()),
    }
}
