// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use crate::Result;

pub trait BootloaderOps: Send + Sync {
    /// Major grub version installed inside `chroot`.
    fn guess_version(&self, chroot: &Path) -> Result<u8>;

    fn guess_kernel(&self, chroot: &Path, regexp: &str) -> Result<String>;

    fn guess_initrd(&self, chroot: &Path, regexp: &str) -> Result<String>;

    fn grub1_cfg(
        &self,
        chroot: &Path,
        kernel: &str,
        initrd: &str,
        kernel_params: &str,
        timeout: u32,
    ) -> Result<()>;

    fn grub1_install(&self, chroot: &Path, install_devices: &[String], boot_device: &str)
    -> Result<()>;

    fn grub2_cfg(&self, chroot: &Path, kernel_params: &str, timeout: u32) -> Result<()>;

    fn grub2_install(&self, chroot: &Path, install_devices: &[String]) -> Result<()>;
}
