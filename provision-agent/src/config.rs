// SPDX-License-Identifier: GPL-3.0-only

//! Agent configuration
//!
//! Loaded once from an optional TOML file and handed to the translator and
//! the pipeline. Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use provision_contracts::{LvmDevicesConfig, ProvisionError, Result, UdevBlacklist};
use provision_layout::{DriverKind, LayoutOptions};
use provision_sys::{HostSettings, HttpSettings, SystemSettings};
use provision_types::LegacyGrubRelease;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Scratch directory for temporary mounts and rendered files
    pub tmp_path: PathBuf,
    pub config_drive_path: PathBuf,
    pub udev_rules_dir: PathBuf,
    pub udev_rules_lib_dir: PathBuf,
    pub udev_rename_substr: String,
    pub udev_empty_rule: String,
    pub image_build_dir: PathBuf,
    pub image_build_suffix: String,
    /// Where the node's filesystems are assembled for the bootloader stage
    pub target_root: PathBuf,
    pub grub_timeout: u32,
    pub max_loop_devices_count: u64,
    pub max_allowed_attempts_attach_image: u32,
    /// MiB
    pub sparse_file_size: u64,
    pub loop_device_major_number: u64,
    /// Render a fresh configdrive instead of reusing `config_drive_path`
    pub prepare_configdrive: bool,
    /// Ship cloud-init data on a configdrive partition rather than the
    /// root filesystem
    pub use_configdrive: bool,
    pub fix_udev_net_rules: bool,
    pub skip_md_containers: bool,
    pub lvm_filter_for_mpath: Vec<String>,
    pub mpath_lvm_preferred_names: Vec<String>,
    pub mpath_lvm_scan_dirs: Vec<String>,
    /// One of none, cylinder, minimal, optimal
    pub partition_alignment: String,
    pub lvm_conf_path: String,
    /// Append `root=UUID=...` to the kernel command line
    pub use_uuid_root: bool,
    pub data_driver: DriverKind,
    /// Bytes
    pub read_chunk_size: usize,
    /// 0 retries forever
    pub http_max_retries: u32,
    pub http_request_timeout_secs: u64,
    pub http_retry_delay_secs: u64,
    pub chroot_stop_attempts: u32,
    pub chroot_stop_delay_secs: u64,
    pub legacy_grub_releases: Vec<LegacyGrubRelease>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tmp_path: PathBuf::from("/tmp"),
            config_drive_path: PathBuf::from("/tmp/config-drive.img"),
            udev_rules_dir: PathBuf::from("/etc/udev/rules.d"),
            udev_rules_lib_dir: PathBuf::from("/lib/udev/rules.d"),
            udev_rename_substr: ".renamedrule".to_string(),
            udev_empty_rule: "empty_rule".to_string(),
            image_build_dir: PathBuf::from("/tmp"),
            image_build_suffix: ".provision-image".to_string(),
            target_root: PathBuf::from("/tmp/target"),
            grub_timeout: 10,
            max_loop_devices_count: 255,
            max_allowed_attempts_attach_image: 10,
            sparse_file_size: 8192,
            loop_device_major_number: 7,
            prepare_configdrive: true,
            use_configdrive: true,
            fix_udev_net_rules: true,
            skip_md_containers: true,
            lvm_filter_for_mpath: vec![
                "r|^/dev/disk/.*|".to_string(),
                "a|^/dev/mapper/.*|".to_string(),
                "r/.*/".to_string(),
            ],
            mpath_lvm_preferred_names: vec!["^/dev/mapper/".to_string()],
            mpath_lvm_scan_dirs: vec!["/dev/disk/".to_string(), "/dev/mapper/".to_string()],
            partition_alignment: "optimal".to_string(),
            lvm_conf_path: "/etc/lvm/lvm.conf".to_string(),
            use_uuid_root: false,
            data_driver: DriverKind::default(),
            read_chunk_size: 1024 * 1024,
            http_max_retries: 30,
            http_request_timeout_secs: 10,
            http_retry_delay_secs: 2,
            chroot_stop_attempts: 10,
            chroot_stop_delay_secs: 2,
            legacy_grub_releases: vec![LegacyGrubRelease {
                name: "centos".to_string(),
                major: 6,
            }],
        }
    }
}

impl AgentConfig {
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ProvisionError::serialization("agent configuration", e))
    }

    /// Defaults when `path` is not given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::debug!("No configuration file given, using defaults");
            return Ok(Self::default());
        };
        tracing::debug!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
        Self::from_toml(&raw)
    }

    pub fn layout_options(&self) -> LayoutOptions {
        LayoutOptions {
            needs_configdrive: self.use_configdrive,
            legacy_grub_releases: self.legacy_grub_releases.clone(),
        }
    }

    pub fn system_settings(&self) -> SystemSettings {
        SystemSettings {
            http: HttpSettings {
                max_retries: self.http_max_retries,
                request_timeout: Duration::from_secs(self.http_request_timeout_secs),
                retry_delay: Duration::from_secs(self.http_retry_delay_secs),
            },
            host: HostSettings {
                chroot_stop_attempts: self.chroot_stop_attempts,
                chroot_stop_delay: Duration::from_secs(self.chroot_stop_delay_secs),
                max_loop_devices_count: self.max_loop_devices_count,
                loop_device_major_number: self.loop_device_major_number,
                max_attach_attempts: self.max_allowed_attempts_attach_image,
            },
            read_chunk_size: self.read_chunk_size,
        }
    }

    pub fn udev_blacklist(&self) -> UdevBlacklist {
        UdevBlacklist {
            rules_dir: self.udev_rules_dir.clone(),
            rules_lib_dir: self.udev_rules_lib_dir.clone(),
            rename_substr: self.udev_rename_substr.clone(),
            empty_rule: self.udev_empty_rule.clone(),
        }
    }

    /// LVM device settings for a target with multipath disks. `whitelist`
    /// goes in front of the configured filters.
    pub fn mpath_lvm_devices(&self, whitelist: Vec<String>) -> LvmDevicesConfig {
        let mut global_filter = whitelist;
        global_filter.extend(self.lvm_filter_for_mpath.iter().cloned());
        LvmDevicesConfig {
            scan: self.mpath_lvm_scan_dirs.clone(),
            global_filter,
            preferred_names: self.mpath_lvm_preferred_names.clone(),
        }
    }
}
