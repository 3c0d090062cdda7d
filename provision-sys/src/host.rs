// SPDX-License-Identifier: GPL-3.0-only

use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use provision_contracts::{
    CommandExecutor, CommandSpec, HostOps, ProvisionError, Result, Sleeper, StopSignal,
    UdevBlacklist,
};
use provision_types::BlockDevice;

use crate::{chroot, hardware, udev};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSettings {
    pub chroot_stop_attempts: u32,
    pub chroot_stop_delay: Duration,
    pub max_loop_devices_count: u64,
    pub loop_device_major_number: u64,
    pub max_attach_attempts: u32,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            chroot_stop_attempts: 10,
            chroot_stop_delay: Duration::from_secs(2),
            max_loop_devices_count: 255,
            loop_device_major_number: 7,
            max_attach_attempts: 10,
        }
    }
}

pub struct HostTools {
    executor: Arc<dyn CommandExecutor>,
    sleeper: Arc<dyn Sleeper>,
    settings: HostSettings,
}

impl HostTools {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        sleeper: Arc<dyn Sleeper>,
        settings: HostSettings,
    ) -> Self {
        Self {
            executor,
            sleeper,
            settings,
        }
    }

    fn run(&self, spec: CommandSpec) -> Result<String> {
        crate::exec::capture(self.executor.as_ref(), &spec)
    }

    fn settle(&self) {
        if let Err(error) = self.executor.execute(&CommandSpec::new("udevadm").arg("settle")) {
            tracing::warn!("udevadm settle did return non-zero exit code: {}", error);
        }
    }

    fn udev_properties(&self, device: &str) -> Result<std::collections::BTreeMap<String, String>> {
        let output = self.run(
            CommandSpec::new("udevadm")
                .args(["info", "--query=property"])
                .arg(format!("--name={device}")),
        )?;
        Ok(hardware::parse_udev_properties(&output))
    }

    fn free_loop_device(&self) -> Option<String> {
        for minor in 0..self.settings.max_loop_devices_count {
            if let Err(error) =
                chroot::ensure_loop_node(minor, self.settings.loop_device_major_number)
            {
                tracing::debug!("{}", error);
            }
            match self.run(CommandSpec::new("losetup").arg("--find")) {
                Ok(output) => {
                    if let Some(device) = output.split_whitespace().next() {
                        return Some(device.to_string());
                    }
                }
                Err(_) => tracing::debug!("Couldn't find free loop device, trying again"),
            }
        }
        None
    }
}

impl HostOps for HostTools {
    fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        let names = std::fs::read_dir("/sys/block")
            .map_err(|error| ProvisionError::io("/sys/block", error))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok());

        let mut devices = Vec::new();
        for name in hardware::candidate_names(names) {
            let properties = self.udev_properties(&format!("/dev/{name}"))?;
            if let Some(device) = hardware::block_device_from_properties(&name, properties) {
                devices.push(device);
            }
        }
        tracing::debug!("Found {} block devices", devices.len());
        Ok(devices)
    }

    fn device_links(&self, device: &str) -> Result<Vec<String>> {
        Ok(self
            .udev_properties(device)?
            .get("DEVLINKS")
            .map(|links| links.split_whitespace().map(ToString::to_string).collect())
            .unwrap_or_default())
    }

    fn is_multipath_device(&self, device: &str) -> Result<bool> {
        Ok(self
            .udev_properties(device)?
            .get("DM_UUID")
            .is_some_and(|uuid| uuid.starts_with("mpath-")))
    }

    fn is_block_device(&self, path: &str) -> bool {
        std::fs::metadata(path).is_ok_and(|metadata| metadata.file_type().is_block_device())
    }

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn blacklist_udev_rules(&self, rules: &UdevBlacklist) -> Result<()> {
        udev::blacklist(rules)?;
        self.settle();
        self.run(CommandSpec::new("udevadm").args(["control", "--reload-rules"]))?;
        Ok(())
    }

    fn unblacklist_udev_rules(&self, rules: &UdevBlacklist) -> Result<()> {
        udev::unblacklist(rules)?;
        self.run(CommandSpec::new("udevadm").args(["control", "--reload-rules"]))?;
        // links skipped while blacklisted are only created on a new event
        self.udev_settle_blocks()
    }

    fn udev_settle_blocks(&self) -> Result<()> {
        self.run(CommandSpec::new("udevadm").args(["trigger", "--subsystem-match=block"]))?;
        self.settle();
        Ok(())
    }

    fn refresh_multipath(&self) -> Result<()> {
        self.run(CommandSpec::new("multipath").arg("-r"))?;
        self.settle();
        Ok(())
    }

    fn zero_range(&self, device: &str, seek: u64, count: u64, tolerate_end: bool) -> Result<()> {
        let mut spec = CommandSpec::new("dd")
            .args(["if=/dev/zero", "bs=1M", "oflag=direct"])
            .arg(format!("seek={seek}"))
            .arg(format!("count={count}"))
            .arg(format!("of={device}"));
        if tolerate_end {
            spec = spec.accept_exit_codes(&[0, 1]);
        }
        self.run(spec)?;
        Ok(())
    }

    fn block_device_size(&self, device: &str) -> Result<u64> {
        let output = self.run(CommandSpec::new("blockdev").args(["--getsize64", device]))?;
        output.trim().parse().map_err(|_| {
            ProvisionError::WrongDevice(format!("{device} reported size {:?}", output.trim()))
        })
    }

    fn chroot_mounts(&self, chroot: &Path) -> Result<String> {
        self.run(
            CommandSpec::new("chroot")
                .arg(chroot.display().to_string())
                .args(["grep", "-v", "rootfs", "/proc/mounts"]),
        )
    }

    fn stop_chrooted_processes(&self, chroot: &Path, signal: StopSignal) -> bool {
        for attempt in 1..=self.settings.chroot_stop_attempts {
            let pids = chroot::chrooted_pids(chroot);
            if pids.is_empty() {
                tracing::debug!("There are no running processes in {}", chroot.display());
                return true;
            }
            chroot::signal_processes(&pids, signal);
            // delivery is asynchronous and exiting may take a while
            tracing::debug!(
                "Attempt {}. Waiting for {:?}",
                attempt,
                self.settings.chroot_stop_delay
            );
            self.sleeper.sleep(self.settings.chroot_stop_delay);
        }

        let survivors = chroot::chrooted_pids(chroot);
        chroot::report_survivors(&survivors);
        survivors.is_empty()
    }

    fn create_sparse_file(&self, dir: &Path, suffix: &str, size: u64) -> Result<PathBuf> {
        Ok(chroot::create_sparse_file(dir, suffix, size)?)
    }

    fn attach_loop(&self, file: &Path) -> Result<String> {
        let file_arg = file.display().to_string();
        for attempt in 1..=self.settings.max_attach_attempts.max(1) {
            tracing::debug!("Looking for a free loop device");
            let Some(device) = self.free_loop_device() else {
                continue;
            };
            tracing::debug!("Attaching image file '{}' to free loop device '{}'", file_arg, device);
            match self.run(CommandSpec::new("losetup").args([device.as_str(), file_arg.as_str()])) {
                Ok(_) => return Ok(device),
                Err(error) => tracing::debug!(
                    "Couldn't attach image file '{}' to loop device '{}' (attempt {}): {}",
                    file_arg,
                    device,
                    attempt,
                    error
                ),
            }
        }
        Err(ProvisionError::NoFreeLoopDevices(file_arg))
    }

    fn detach_loop(&self, device: &str) -> Result<()> {
        let output = self.run(CommandSpec::new("losetup").arg("-a"))?;
        if chroot::parse_attached_loops(&output)
            .iter()
            .any(|attached| attached == device)
        {
            tracing::debug!("Loop device {} seems to be attached. Trying to detach.", device);
            self.run(CommandSpec::new("losetup").args(["-d", device]))?;
        }
        Ok(())
    }

    fn reboot(&self) -> Result<()> {
        tracing::info!("Rebooting node");
        self.run(CommandSpec::new("reboot"))?;
        Ok(())
    }
}
