// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::Result;

pub trait FilesystemOps: Send + Sync {
    /// Create a filesystem (or swap area) and wait until its UUID is readable.
    fn make_fs(&self, fs_type: &str, options: &str, label: Option<&str>, device: &str)
    -> Result<()>;

    /// Grow a filesystem to fill its device.
    fn extend_fs(&self, fs_type: &str, device: &str) -> Result<()>;

    fn mount_fs(&self, fs_type: &str, device: &str, mountpoint: &Path) -> Result<()>;

    /// Bind-mount host `path` into the same path under `chroot`.
    fn mount_bind(&self, chroot: &Path, path: &str) -> Result<()>;

    /// Unmount, doing nothing when `mountpoint` is not mounted.
    fn umount_fs(&self, mountpoint: &Path) -> Result<()>;

    fn probe_uuid(&self, device: &str) -> Result<String>;

    fn probe_fs_type(&self, device: &str) -> Result<Option<String>>;

    /// Toggle the ext4 journal, used to speed up image builds.
    fn set_journal(&self, device: &str, enabled: bool) -> Result<()>;
}
