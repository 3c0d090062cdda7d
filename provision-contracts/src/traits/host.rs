// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use provision_types::BlockDevice;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Kill,
}

/// udev rule directories touched while partitions are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdevBlacklist {
    pub rules_dir: PathBuf,
    pub rules_lib_dir: PathBuf,
    pub rename_substr: String,
    pub empty_rule: String,
}

pub trait HostOps: Send + Sync {
    fn list_block_devices(&self) -> Result<Vec<BlockDevice>>;

    fn device_links(&self, device: &str) -> Result<Vec<String>>;

    fn is_multipath_device(&self, device: &str) -> Result<bool>;

    fn is_block_device(&self, path: &str) -> bool;

    fn path_exists(&self, path: &str) -> bool;

    /// Shadow every library rule with an empty rule so udev stays quiet.
    fn blacklist_udev_rules(&self, rules: &UdevBlacklist) -> Result<()>;

    fn unblacklist_udev_rules(&self, rules: &UdevBlacklist) -> Result<()>;

    /// Trigger block device events and wait for udev to settle.
    fn udev_settle_blocks(&self) -> Result<()>;

    fn refresh_multipath(&self) -> Result<()>;

    /// Zero `count` MiB of `device` starting at `seek` MiB. With
    /// `tolerate_end` set, running past the end of the device is fine.
    fn zero_range(&self, device: &str, seek: u64, count: u64, tolerate_end: bool) -> Result<()>;

    fn block_device_size(&self, device: &str) -> Result<u64>;

    /// `/proc/mounts` as seen from inside `chroot`, without rootfs.
    fn chroot_mounts(&self, chroot: &Path) -> Result<String>;

    /// Signal every process whose root is `chroot`. Returns true once none
    /// are left.
    fn stop_chrooted_processes(&self, chroot: &Path, signal: StopSignal) -> bool;

    /// Create a sparse file of `size` MiB in `dir`.
    fn create_sparse_file(&self, dir: &Path, suffix: &str, size: u64) -> Result<PathBuf>;

    fn attach_loop(&self, file: &Path) -> Result<String>;

    fn detach_loop(&self, device: &str) -> Result<()>;

    fn reboot(&self) -> Result<()>;
}
