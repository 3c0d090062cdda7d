// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem creation, growth and mounting via the standard utilities

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use provision_contracts::{
    CommandExecutor, CommandSpec, FilesystemOps, ProvisionError, Result, RetryPolicy, Sleeper,
};

/// Filesystem labels longer than this are truncated.
const MAX_LABEL_LEN: usize = 12;

/// mkfs is re-run until blkid can read back a UUID.
const MAKE_FS_ATTEMPTS: u32 = 5;

pub struct FsTools {
    executor: Arc<dyn CommandExecutor>,
    sleeper: Arc<dyn Sleeper>,
}

impl FsTools {
    pub fn new(executor: Arc<dyn CommandExecutor>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { executor, sleeper }
    }

    fn run(&self, spec: CommandSpec) -> Result<String> {
        crate::exec::capture(self.executor.as_ref(), &spec)
    }
}

fn truncate_label(label: &str) -> String {
    label.chars().take(MAX_LABEL_LEN).collect()
}

/// Build the mkfs (or mkswap) invocation for `fs_type`.
fn mkfs_command(fs_type: &str, options: &str, label: Option<&str>, device: &str) -> CommandSpec {
    let mut spec = if fs_type == "swap" {
        CommandSpec::new("mkswap")
    } else {
        CommandSpec::new(format!("mkfs.{fs_type}"))
    };
    // xfs and swap refuse to overwrite an existing signature without -f
    if matches!(fs_type, "xfs" | "swap") {
        spec = spec.arg("-f");
    }
    spec = spec.args(options.split_whitespace());
    if let Some(label) = label.filter(|label| !label.is_empty()) {
        spec = spec.arg("-L").arg(truncate_label(label));
    }
    spec.arg(device)
}

impl FilesystemOps for FsTools {
    fn make_fs(
        &self,
        fs_type: &str,
        options: &str,
        label: Option<&str>,
        device: &str,
    ) -> Result<()> {
        let policy = RetryPolicy::new(MAKE_FS_ATTEMPTS, Duration::from_secs(1));
        policy.run(self.sleeper.as_ref(), "make_fs", |attempt| {
            tracing::debug!("Creating {} on {} (attempt {})", fs_type, device, attempt);
            self.run(mkfs_command(fs_type, options, label, device))?;
            let uuid = self.probe_uuid(device)?;
            if uuid.is_empty() {
                return Err(ProvisionError::FsUtils(format!(
                    "no UUID readable on {device} after mkfs"
                )));
            }
            tracing::debug!("Filesystem on {} has UUID {}", device, uuid);
            Ok(())
        })
    }

    fn extend_fs(&self, fs_type: &str, device: &str) -> Result<()> {
        match fs_type {
            "ext2" | "ext3" | "ext4" => {
                self.run(CommandSpec::new("e2fsck").args(["-yf", device]))?;
                self.run(CommandSpec::new("resize2fs").arg(device))?;
                self.run(CommandSpec::new("e2fsck").args(["-pf", device]))?;
                Ok(())
            }
            "xfs" => {
                self.run(CommandSpec::new("xfs_growfs").arg(device))?;
                Ok(())
            }
            other => Err(ProvisionError::FsUtils(format!(
                "unsupported file system type {other}"
            ))),
        }
    }

    fn mount_fs(&self, fs_type: &str, device: &str, mountpoint: &Path) -> Result<()> {
        self.run(
            CommandSpec::new("mount")
                .args(["-t", fs_type, device])
                .arg(mountpoint.display().to_string()),
        )?;
        Ok(())
    }

    fn mount_bind(&self, chroot: &Path, path: &str) -> Result<()> {
        let target = format!("{}{}", chroot.display(), path);
        self.run(CommandSpec::new("mount").args(["--bind", path, &target]))?;
        Ok(())
    }

    fn umount_fs(&self, mountpoint: &Path) -> Result<()> {
        let mountpoint = mountpoint.display().to_string();
        let mounted = self
            .executor
            .execute(&CommandSpec::new("mountpoint").args(["-q", &mountpoint]))
            .is_ok();
        if !mounted {
            tracing::warn!("{} is not a mountpoint, skipping umount", mountpoint);
            return Ok(());
        }
        tracing::debug!("Trying to umount {}", mountpoint);
        if let Err(error) = self.run(CommandSpec::new("umount").arg(&mountpoint)) {
            tracing::warn!("Error while umounting {}: {}", mountpoint, error);
            tracing::debug!("Trying lazy umounting {}", mountpoint);
            self.run(CommandSpec::new("umount").args(["-l", &mountpoint]))?;
        }
        Ok(())
    }

    fn probe_uuid(&self, device: &str) -> Result<String> {
        let output = self.run(
            CommandSpec::new("blkid").args(["-c", "/dev/null", "-o", "value", "-s", "UUID", device]),
        )?;
        Ok(output.trim().to_string())
    }

    fn probe_fs_type(&self, device: &str) -> Result<Option<String>> {
        // blkid exits 2 when it finds no signature at all
        let output = self.run(
            CommandSpec::new("blkid")
                .args(["-o", "value", "-s", "TYPE", "-c", "/dev/null", device])
                .accept_exit_codes(&[0, 2]),
        )?;
        let fs_type = output.trim();
        Ok((!fs_type.is_empty()).then(|| fs_type.to_string()))
    }

    fn set_journal(&self, device: &str, enabled: bool) -> Result<()> {
        let feature = if enabled { "has_journal" } else { "^has_journal" };
        self.run(CommandSpec::new("tune2fs").args(["-O", feature, device]))?;
        Ok(())
    }
}
