// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning pipeline
//!
//! One [`Manager`] drives one node through
//! `Partition -> ConfigDrive -> CopyImages -> Bootloader`, or through an
//! image build. Stages run strictly in order and never concurrently: label
//! writes, udev rule processing and multipath maps are host-wide state.
//!
//! Every stage that acquires a mount, loop device or temporary directory
//! releases it on all exit paths. A release failure is logged and only
//! surfaces when the stage itself succeeded.

mod bootloader;
mod build;
mod configdrive;
mod images;
mod partitioning;

use std::path::Path;

use provision_contracts::{ProvisionError, Result, Toolbox};
use provision_layout::Driver;
use provision_types::SchemeError;

use crate::config::AgentConfig;
use crate::target::{self, under_chroot};

/// Pseudo filesystems bound into a working root, in mount order.
const PSEUDO_FILESYSTEMS: [&str; 3] = ["/sys", "/dev", "/proc"];

pub struct Manager {
    driver: Driver,
    tools: Toolbox,
    config: AgentConfig,
}

impl Manager {
    pub fn new(driver: Driver, tools: Toolbox, config: AgentConfig) -> Self {
        tracing::debug!("Manager created for {} driver", driver.kind());
        Self {
            driver,
            tools,
            config,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn do_provisioning(&mut self) -> Result<()> {
        tracing::info!("--- Provisioning (do_provisioning) ---");
        self.do_partitioning()?;
        if self.config.use_configdrive {
            self.do_configdrive()?;
        }
        self.do_copyimage()?;
        self.do_bootloader()?;
        tracing::info!("--- Provisioning END (do_provisioning) ---");
        Ok(())
    }

    pub fn do_reboot(&self) -> Result<()> {
        tracing::info!("--- Rebooting node (do_reboot) ---");
        self.tools.host.reboot()
    }

    /// Mount every filesystem of the scheme below `chroot`, parents first.
    fn mount_target(&self, chroot: &Path, treat_mtab: bool, pseudo: bool) -> Result<()> {
        tracing::debug!("Mounting target file systems: {}", chroot.display());
        let scheme = self.driver.partition_scheme();
        for fs in scheme.fs_sorted_by_depth(false) {
            let Some(mount) = fs.mountpoint() else {
                continue;
            };
            let device = scheme.resolve_device(&fs.device).ok_or_else(|| {
                SchemeError::wrong_scheme(format!("device {} is not attached", fs.device))
            })?;
            let mountpoint = under_chroot(chroot, mount);
            std::fs::create_dir_all(&mountpoint)
                .map_err(|e| ProvisionError::io(&mountpoint, e))?;
            self.tools.fs.mount_fs(&fs.fs_type, &device, &mountpoint)?;
        }

        if pseudo {
            for path in PSEUDO_FILESYSTEMS {
                self.tools.fs.mount_bind(chroot, path)?;
            }
        }

        if treat_mtab {
            let mounts = self.tools.host.chroot_mounts(chroot)?;
            target::write_mtab(chroot, &mounts)?;
        }
        Ok(())
    }

    /// Reverse of [`Self::mount_target`]. Keeps going past failures and
    /// reports the first one.
    fn umount_target(&self, chroot: &Path, pseudo: bool) -> Result<()> {
        tracing::debug!("Umounting target file systems: {}", chroot.display());
        let mut first_error = None;

        if pseudo {
            for path in ["/proc", "/dev", "/sys"] {
                let result = self.tools.fs.umount_fs(&under_chroot(chroot, path));
                keep_first_error(&mut first_error, result);
            }
        }

        for fs in self
            .driver
            .partition_scheme()
            .fs_sorted_by_depth(true)
        {
            if let Some(mount) = fs.mountpoint() {
                let result = self.tools.fs.umount_fs(&under_chroot(chroot, mount));
                keep_first_error(&mut first_error, result);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn keep_first_error(first: &mut Option<ProvisionError>, result: Result<()>) {
    if let Err(e) = result {
        if first.is_some() {
            tracing::warn!("Further cleanup failure: {}", e);
        } else {
            *first = Some(e);
        }
    }
}

/// Combine a stage result with the result of its cleanup. A cleanup failure
/// never replaces the stage's own error.
pub(crate) fn finish<T>(primary: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (primary, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup_error)) => {
            tracing::warn!("Cleanup failed after an earlier error: {}", cleanup_error);
            Err(e)
        }
    }
}

/// Log and drop a teardown failure.
pub(crate) fn log_cleanup(what: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!("Failed to {}: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(what: &str) -> ProvisionError {
        ProvisionError::FsUtils(what.to_string())
    }

    #[test]
    fn cleanup_error_does_not_mask_primary() {
        let result: Result<()> = finish(Err(failure("mount")), Err(failure("umount")));
        match result {
            Err(ProvisionError::FsUtils(what)) => assert_eq!(what, "mount"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn cleanup_error_surfaces_after_success() {
        let result = finish(Ok(3), Err(failure("umount")));
        assert!(matches!(result, Err(ProvisionError::FsUtils(_))));
        assert_eq!(finish(Ok(3), Ok(())).expect("both succeed"), 3);
    }

    #[test]
    fn first_cleanup_error_is_kept() {
        let mut first = None;
        keep_first_error(&mut first, Ok(()));
        keep_first_error(&mut first, Err(failure("proc")));
        keep_first_error(&mut first, Err(failure("sys")));
        assert!(matches!(first, Some(ProvisionError::FsUtils(ref what)) if what == "proc"));
    }
}
