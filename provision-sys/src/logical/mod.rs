// SPDX-License-Identifier: GPL-3.0-only

//! MD RAID and LVM management through mdadm and the lvm2 tools

pub mod lvm_conf;
pub mod lvm_tools;
pub mod mdadm_tools;

use std::path::Path;
use std::sync::Arc;

use provision_contracts::{CommandExecutor, CommandSpec, LogicalOps, LvmDevicesConfig, Result};

pub struct LogicalTools {
    executor: Arc<dyn CommandExecutor>,
}

impl LogicalTools {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn lvm_available() -> bool {
        which::which("lvm").is_ok()
    }

    fn run(&self, spec: CommandSpec) -> Result<String> {
        crate::exec::capture(self.executor.as_ref(), &spec)
    }
}

impl LogicalOps for LogicalTools {
    fn md_clean_all(&self, skip_containers: bool) -> Result<()> {
        if which::which("mdadm").is_err() {
            tracing::debug!("mdadm is not installed, nothing to clean");
            return Ok(());
        }
        let scan = self
            .run(CommandSpec::new("mdadm").args(["--detail", "--scan"]))
            .unwrap_or_default();
        let mdstat = std::fs::read_to_string("/proc/mdstat").unwrap_or_default();
        let arrays = mdadm_tools::arrays_to_clean(&scan, &mdstat, skip_containers);

        for array in arrays {
            tracing::debug!("Removing MD device {} with members {:?}", array.device, array.members);
            self.run(CommandSpec::new("mdadm").args(["--stop", &array.device]))?;
            // the array node may already be gone once stopped
            self.run(
                CommandSpec::new("mdadm")
                    .args(["--remove", &array.device])
                    .accept_exit_codes(&[0, 1]),
            )?;
            for member in &array.members {
                self.run(
                    CommandSpec::new("mdadm")
                        .args(["--zero-superblock", "--force", member])
                        .accept_exit_codes(&[0, 1]),
                )?;
            }
        }
        Ok(())
    }

    fn md_create(&self, name: &str, level: &str, devices: &[String], metadata: &str) -> Result<()> {
        for device in devices {
            self.run(
                CommandSpec::new("mdadm")
                    .args(["--zero-superblock", "--force", device])
                    .accept_exit_codes(&[0, 1]),
            )?;
        }
        self.run(mdadm_tools::create_command(name, level, devices, metadata))?;
        Ok(())
    }

    fn pv_create(&self, name: &str, metadatasize: u32, metadatacopies: u32) -> Result<()> {
        self.run(lvm_tools::pvcreate_command(name, metadatasize, metadatacopies))?;
        Ok(())
    }

    fn vg_create(&self, name: &str, pvnames: &[String]) -> Result<()> {
        self.run(
            CommandSpec::new("vgcreate")
                .arg(name)
                .args(pvnames.iter().cloned()),
        )?;
        Ok(())
    }

    fn lv_create(&self, vgname: &str, name: &str, size: u64) -> Result<()> {
        self.run(
            CommandSpec::new("lvcreate")
                .args(["--yes", "-L"])
                .arg(format!("{size}m"))
                .args(["-n", name, vgname]),
        )?;
        Ok(())
    }

    fn lv_remove_all(&self) -> Result<()> {
        if !Self::lvm_available() {
            return Ok(());
        }
        let output = self.run(lvm_tools::report_command("lvs", "vg_name,lv_name"))?;
        for lv in lvm_tools::parse_lvs(&output) {
            self.run(CommandSpec::new("lvremove").args(["-ff", &lv.path()]))?;
        }
        Ok(())
    }

    fn vg_remove_all(&self) -> Result<()> {
        if !Self::lvm_available() {
            return Ok(());
        }
        let output = self.run(lvm_tools::report_command("vgs", "vg_name"))?;
        for vg in lvm_tools::parse_names(&output) {
            self.run(CommandSpec::new("vgremove").args(["-f", &vg]))?;
        }
        Ok(())
    }

    fn pv_remove_all(&self) -> Result<()> {
        if !Self::lvm_available() {
            return Ok(());
        }
        let output = self.run(lvm_tools::report_command("pvs", "pv_name"))?;
        for pv in lvm_tools::parse_names(&output) {
            self.run(CommandSpec::new("pvremove").args(["-ff", "-y", &pv]))?;
        }
        Ok(())
    }

    fn override_lvm_config(
        &self,
        chroot: &Path,
        devices: &LvmDevicesConfig,
        lvm_conf_path: &str,
        update_initramfs: bool,
    ) -> Result<()> {
        let chroot_arg = chroot.display().to_string();
        let dump = || {
            self.run(CommandSpec::new("chroot").args([chroot_arg.as_str(), "lvm", "dumpconfig"]))
        };
        let conf_file = chroot.join(lvm_conf_path.trim_start_matches('/'));

        for (name, values) in lvm_conf::device_overrides(devices) {
            let updated = lvm_conf::update_option(&dump()?, "devices", name, &values);
            lvm_conf::write_checked(&conf_file, &updated, &dump)?;
            tracing::info!(
                "LVM configuration {} updated. Option devices/{} gets new value: {:?}",
                conf_file.display(),
                name,
                values
            );
        }

        if update_initramfs {
            tracing::info!("Updating target initramfs");
            self.run(CommandSpec::new("chroot").args([
                chroot_arg.as_str(),
                "update-initramfs",
                "-v",
                "-u",
                "-k",
                "all",
            ]))?;
        }
        Ok(())
    }
}
