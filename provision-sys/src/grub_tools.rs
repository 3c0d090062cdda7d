// SPDX-License-Identifier: GPL-3.0-only

//! Legacy grub and grub2 configuration and installation inside a chroot

use std::path::Path;
use std::sync::Arc;

use provision_contracts::{BootloaderOps, CommandExecutor, CommandSpec, ProvisionError, Result};
use provision_types::SchemeError;
use regex::Regex;

const GRUB1_INSTALL_CANDIDATES: [&str; 3] = ["/sbin/grub", "/usr/sbin/grub", "/usr/bin/grub"];
const GRUB2_INSTALL_CANDIDATES: [&str; 4] = [
    "/sbin/grub-install",
    "/usr/sbin/grub-install",
    "/usr/sbin/grub2-install",
    "/sbin/grub2-install",
];
const GRUB2_MKCONFIG_CANDIDATES: [&str; 4] = [
    "/sbin/grub-mkconfig",
    "/usr/sbin/grub-mkconfig",
    "/usr/sbin/grub2-mkconfig",
    "/sbin/grub2-mkconfig",
];
const GRUB1_STAGE_DIRS: [&str; 2] = ["/usr/share/grub", "/usr/lib/grub"];

pub struct GrubTools {
    executor: Arc<dyn CommandExecutor>,
}

fn find_in_chroot(chroot: &Path, candidates: &[&'static str]) -> Option<&'static str> {
    candidates
        .iter()
        .copied()
        .find(|candidate| chroot.join(candidate.trim_start_matches('/')).exists())
}

/// Legacy grub reports a 0.9x version string.
fn parse_grub_version(output: &str) -> u8 {
    if output.contains("0.9") { 1 } else { 2 }
}

/// Newest entry of `dir` whose name matches `regexp`.
fn guess_filename(dir: &Path, regexp: &str) -> Result<String> {
    let pattern = Regex::new(regexp).map_err(|error| {
        SchemeError::WrongInputData(format!("invalid file pattern {regexp}: {error}"))
    })?;
    let entries = std::fs::read_dir(dir).map_err(|error| ProvisionError::io(dir, error))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| pattern.is_match(name))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    names.into_iter().next().ok_or_else(|| {
        ProvisionError::FsUtils(format!("no file matching {regexp} in {}", dir.display()))
    })
}

/// Zero-based grub partition index of `boot_device`.
fn boot_partition_index(boot_device: &str) -> Result<u32> {
    let digits: String = boot_device
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits
        .parse::<u32>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .ok_or_else(|| ProvisionError::WrongDevice(boot_device.to_string()))
}

fn grub1_config(kernel: &str, initrd: &str, kernel_params: &str, timeout: u32) -> String {
    format!(
        "default=0\ntimeout={timeout}\ntitle Default ({kernel})\n    kernel /{kernel} {kernel_params}\n    initrd /{initrd}\n"
    )
}

fn grub1_batch(install_device: &str, boot_partition: u32) -> String {
    format!("device (hd0) {install_device}\nroot (hd0,{boot_partition})\nsetup (hd0)\nquit\n")
}

/// Set the kernel command line and timeout in an `/etc/default/grub` body.
fn edit_default_grub(content: &str, kernel_params: &str, timeout: u32) -> String {
    let cmdline = format!("GRUB_CMDLINE_LINUX=\"{kernel_params}\"");
    let timeout = format!("GRUB_TIMEOUT={timeout}");
    let mut seen_cmdline = false;
    let mut seen_timeout = false;

    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with("GRUB_CMDLINE_LINUX=") {
                seen_cmdline = true;
                cmdline.clone()
            } else if line.starts_with("GRUB_TIMEOUT=") {
                seen_timeout = true;
                timeout.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !seen_cmdline {
        lines.push(cmdline);
    }
    if !seen_timeout {
        lines.push(timeout);
    }
    let mut edited = lines.join("\n");
    edited.push('\n');
    edited
}

impl GrubTools {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn chrooted(&self, chroot: &Path, program: &str) -> CommandSpec {
        CommandSpec::new("chroot")
            .arg(chroot.display().to_string())
            .arg(program)
    }

    fn run(&self, spec: CommandSpec) -> Result<String> {
        crate::exec::capture(self.executor.as_ref(), &spec)
    }

    fn grub2_install_binary(&self, chroot: &Path) -> Result<&'static str> {
        find_in_chroot(chroot, &GRUB2_INSTALL_CANDIDATES)
            .ok_or_else(|| ProvisionError::FsUtils("grub-install not found in target".to_string()))
    }
}

impl BootloaderOps for GrubTools {
    fn guess_version(&self, chroot: &Path) -> Result<u8> {
        if find_in_chroot(chroot, &GRUB2_MKCONFIG_CANDIDATES).is_some() {
            return Ok(2);
        }
        let Some(binary) = find_in_chroot(chroot, &GRUB2_INSTALL_CANDIDATES)
            .or_else(|| find_in_chroot(chroot, &GRUB1_INSTALL_CANDIDATES))
        else {
            return Err(ProvisionError::FsUtils(
                "no grub installation found in target".to_string(),
            ));
        };
        let output = self.executor.execute(&self.chrooted(chroot, binary).arg("--version"))?;
        let version = parse_grub_version(&format!("{}{}", output.stdout, output.stderr));
        tracing::debug!("Looks like grub version is {}", version);
        Ok(version)
    }

    fn guess_kernel(&self, chroot: &Path, regexp: &str) -> Result<String> {
        guess_filename(&chroot.join("boot"), regexp)
    }

    fn guess_initrd(&self, chroot: &Path, regexp: &str) -> Result<String> {
        guess_filename(&chroot.join("boot"), regexp)
    }

    fn grub1_cfg(
        &self,
        chroot: &Path,
        kernel: &str,
        initrd: &str,
        kernel_params: &str,
        timeout: u32,
    ) -> Result<()> {
        let path = chroot.join("boot/grub/grub.conf");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| ProvisionError::io(parent, error))?;
        }
        std::fs::write(&path, grub1_config(kernel, initrd, kernel_params, timeout))
            .map_err(|error| ProvisionError::io(&path, error))
    }

    fn grub1_install(
        &self,
        chroot: &Path,
        install_devices: &[String],
        boot_device: &str,
    ) -> Result<()> {
        let boot_partition = boot_partition_index(boot_device)?;
        let Some(binary) = find_in_chroot(chroot, &GRUB1_INSTALL_CANDIDATES) else {
            return Err(ProvisionError::FsUtils("grub not found in target".to_string()));
        };

        // stage files must sit next to grub.conf before setup
        let grub_dir = chroot.join("boot/grub");
        for stage_dir in GRUB1_STAGE_DIRS {
            let stage_dir = chroot.join(stage_dir.trim_start_matches('/'));
            let Ok(arches) = std::fs::read_dir(&stage_dir) else {
                continue;
            };
            for arch in arches.filter_map(|entry| entry.ok()) {
                let Ok(files) = std::fs::read_dir(arch.path()) else {
                    continue;
                };
                for file in files.filter_map(|entry| entry.ok()) {
                    let target = grub_dir.join(file.file_name());
                    std::fs::copy(file.path(), &target)
                        .map_err(|error| ProvisionError::io(&target, error))?;
                }
            }
        }

        for device in install_devices {
            tracing::debug!("Installing legacy grub on {}", device);
            self.run(
                self.chrooted(chroot, binary)
                    .args(["--no-floppy", "--batch"])
                    .stdin(grub1_batch(device, boot_partition)),
            )?;
        }
        Ok(())
    }

    fn grub2_cfg(&self, chroot: &Path, kernel_params: &str, timeout: u32) -> Result<()> {
        let default_grub = chroot.join("etc/default/grub");
        let content = std::fs::read_to_string(&default_grub).unwrap_or_default();
        std::fs::write(
            &default_grub,
            edit_default_grub(&content, kernel_params, timeout),
        )
        .map_err(|error| ProvisionError::io(&default_grub, error))?;

        let mkconfig = find_in_chroot(chroot, &GRUB2_MKCONFIG_CANDIDATES)
            .ok_or_else(|| ProvisionError::FsUtils("grub-mkconfig not found in target".to_string()))?;
        let config = if mkconfig.contains("grub2") {
            "/boot/grub2/grub.cfg"
        } else {
            "/boot/grub/grub.cfg"
        };
        self.run(self.chrooted(chroot, mkconfig).args(["-o", config]))?;
        Ok(())
    }

    fn grub2_install(&self, chroot: &Path, install_devices: &[String]) -> Result<()> {
        let binary = self.grub2_install_binary(chroot)?;
        for device in install_devices {
            tracing::debug!("Installing grub2 on {}", device);
            self.run(self.chrooted(chroot, binary).arg(device))?;
        }
        Ok(())
    }
}
