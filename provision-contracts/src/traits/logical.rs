// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Values written into the `devices` section of an lvm.conf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmDevicesConfig {
    pub scan: Vec<String>,
    pub global_filter: Vec<String>,
    pub preferred_names: Vec<String>,
}

pub trait LogicalOps: Send + Sync {
    /// Stop and zero every MD array, optionally leaving IMSM/DDF containers.
    fn md_clean_all(&self, skip_containers: bool) -> Result<()>;

    fn md_create(&self, name: &str, level: &str, devices: &[String], metadata: &str)
    -> Result<()>;

    fn pv_create(&self, name: &str, metadatasize: u32, metadatacopies: u32) -> Result<()>;

    fn vg_create(&self, name: &str, pvnames: &[String]) -> Result<()>;

    /// Size in MiB.
    fn lv_create(&self, vgname: &str, name: &str, size: u64) -> Result<()>;

    fn lv_remove_all(&self) -> Result<()>;

    fn vg_remove_all(&self) -> Result<()>;

    fn pv_remove_all(&self) -> Result<()>;

    /// Rewrite the devices section of `lvm_conf_path` inside `chroot`,
    /// optionally rebuilding the initramfs so early boot sees the filter.
    fn override_lvm_config(
        &self,
        chroot: &Path,
        devices: &LvmDevicesConfig,
        lvm_conf_path: &str,
        update_initramfs: bool,
    ) -> Result<()>;

    /// Remove all MD and LVM metadata known to the host.
    fn wipe_all(&self, skip_md_containers: bool) -> Result<()> {
        self.md_clean_all(skip_md_containers)?;
        self.lv_remove_all()?;
        self.vg_remove_all()?;
        self.pv_remove_all()
    }
}
