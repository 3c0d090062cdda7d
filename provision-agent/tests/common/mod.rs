// SPDX-License-Identifier: GPL-3.0-only

//! Recording fake of every system contract, plus node fixtures.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use provision_agent::{AgentConfig, Manager};
use provision_contracts::{
    BootloaderOps, FilesystemOps, HostOps, ImageOps, LogicalOps, LvmDevicesConfig,
    PartitionOps, ProvisionError, Result, RootfsInstaller, StopSignal, Toolbox, UdevBlacklist,
};
use provision_layout::{Driver, Nailgun, SimpleData};
use provision_types::{
    BlockDevice, Container, ImageMetadata, Label, OperatingSystem, PartitionType,
};
use serde_json::{Value, json};

#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<String>,
    pub multipath: BTreeSet<String>,
    pub missing_paths: BTreeSet<String>,
    pub not_block_devices: BTreeSet<String>,
    pub md5: BTreeMap<String, String>,
    pub grub_version: u8,
    /// Calls starting with this prefix fail
    pub fail_on: Option<String>,
    pub block_devices: Vec<BlockDevice>,
    pub links: BTreeMap<String, Vec<String>>,
    pub documents: BTreeMap<String, String>,
    pub processes_stop: bool,
    pub device_size: u64,
    pub next_loop: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            multipath: BTreeSet::new(),
            missing_paths: BTreeSet::new(),
            not_block_devices: BTreeSet::new(),
            md5: BTreeMap::new(),
            grub_version: 2,
            fail_on: None,
            block_devices: Vec::new(),
            links: BTreeMap::new(),
            documents: BTreeMap::new(),
            processes_stop: true,
            device_size: 20 * 1024 * 1024,
            next_loop: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSystem {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock")
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Recorded calls whose name is `name`.
    pub fn calls_named(&self, name: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(name))
            .collect()
    }

    /// Position of the first call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|call| call.starts_with(prefix))
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox {
            fs: Box::new(self.clone()),
            partitions: Box::new(self.clone()),
            logical: Box::new(self.clone()),
            bootloader: Box::new(self.clone()),
            images: Box::new(self.clone()),
            host: Box::new(self.clone()),
            installer: Box::new(self.clone()),
        }
    }

    fn record(&self, call: String) -> Result<()> {
        let mut state = self.state();
        let fails = state
            .fail_on
            .as_deref()
            .is_some_and(|prefix| call.starts_with(prefix));
        state.calls.push(call.clone());
        if fails {
            return Err(ProvisionError::Execution {
                command: call,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl FilesystemOps for FakeSystem {
    fn make_fs(&self, fs_type: &str, options: &str, label: Option<&str>, device: &str)
    -> Result<()> {
        self.record(format!(
            "make_fs {fs_type} {device} options={options} label={}",
            label.unwrap_or("")
        ))
    }

    fn extend_fs(&self, fs_type: &str, device: &str) -> Result<()> {
        self.record(format!("extend_fs {fs_type} {device}"))
    }

    fn mount_fs(&self, fs_type: &str, device: &str, mountpoint: &Path) -> Result<()> {
        self.record(format!("mount_fs {fs_type} {device} {}", mountpoint.display()))
    }

    fn mount_bind(&self, chroot: &Path, path: &str) -> Result<()> {
        self.record(format!("mount_bind {} {path}", chroot.display()))
    }

    fn umount_fs(&self, mountpoint: &Path) -> Result<()> {
        self.record(format!("umount_fs {}", mountpoint.display()))
    }

    fn probe_uuid(&self, device: &str) -> Result<String> {
        self.record(format!("probe_uuid {device}"))?;
        Ok(format!("uuid-{}", device.trim_start_matches("/dev/").replace('/', "-")))
    }

    fn probe_fs_type(&self, device: &str) -> Result<Option<String>> {
        self.record(format!("probe_fs_type {device}"))?;
        Ok(None)
    }

    fn set_journal(&self, device: &str, enabled: bool) -> Result<()> {
        self.record(format!("set_journal {device} {enabled}"))
    }
}

impl PartitionOps for FakeSystem {
    fn make_label(&self, device: &str, label: Label) -> Result<()> {
        self.record(format!("make_label {device} {label}"))
    }

    fn make_partition(
        &self,
        device: &str,
        begin: u64,
        end: u64,
        partition_type: PartitionType,
        alignment: &str,
    ) -> Result<()> {
        self.record(format!(
            "make_partition {device} {begin} {end} {partition_type} {alignment}"
        ))
    }

    fn set_partition_flag(&self, device: &str, count: u32, flag: &str) -> Result<()> {
        self.record(format!("set_partition_flag {device} {count} {flag}"))
    }

    fn set_gpt_type(&self, device: &str, count: u32, guid: &str) -> Result<()> {
        self.record(format!("set_gpt_type {device} {count} {guid}"))
    }
}

impl LogicalOps for FakeSystem {
    fn md_clean_all(&self, skip_containers: bool) -> Result<()> {
        self.record(format!("md_clean_all {skip_containers}"))
    }

    fn md_create(&self, name: &str, level: &str, devices: &[String], metadata: &str)
    -> Result<()> {
        self.record(format!("md_create {name} {level} {} {metadata}", devices.join(",")))
    }

    fn pv_create(&self, name: &str, metadatasize: u32, metadatacopies: u32) -> Result<()> {
        self.record(format!("pv_create {name} {metadatasize} {metadatacopies}"))
    }

    fn vg_create(&self, name: &str, pvnames: &[String]) -> Result<()> {
        self.record(format!("vg_create {name} {}", pvnames.join(",")))
    }

    fn lv_create(&self, vgname: &str, name: &str, size: u64) -> Result<()> {
        self.record(format!("lv_create {vgname} {name} {size}"))
    }

    fn lv_remove_all(&self) -> Result<()> {
        self.record("lv_remove_all".to_string())
    }

    fn vg_remove_all(&self) -> Result<()> {
        self.record("vg_remove_all".to_string())
    }

    fn pv_remove_all(&self) -> Result<()> {
        self.record("pv_remove_all".to_string())
    }

    fn override_lvm_config(
        &self,
        chroot: &Path,
        devices: &LvmDevicesConfig,
        lvm_conf_path: &str,
        update_initramfs: bool,
    ) -> Result<()> {
        self.record(format!(
            "override_lvm_config {} {} {lvm_conf_path} {update_initramfs}",
            chroot.display(),
            devices.global_filter.join(";")
        ))
    }
}

impl BootloaderOps for FakeSystem {
    fn guess_version(&self, chroot: &Path) -> Result<u8> {
        self.record(format!("guess_version {}", chroot.display()))?;
        Ok(self.state().grub_version)
    }

    fn guess_kernel(&self, _chroot: &Path, regexp: &str) -> Result<String> {
        self.record(format!("guess_kernel {regexp}"))?;
        Ok("vmlinuz-fake".to_string())
    }

    fn guess_initrd(&self, _chroot: &Path, regexp: &str) -> Result<String> {
        self.record(format!("guess_initrd {regexp}"))?;
        Ok("initrd-fake".to_string())
    }

    fn grub1_cfg(
        &self,
        _chroot: &Path,
        kernel: &str,
        initrd: &str,
        kernel_params: &str,
        timeout: u32,
    ) -> Result<()> {
        self.record(format!("grub1_cfg {kernel} {initrd} {timeout} {kernel_params}"))
    }

    fn grub1_install(&self, _chroot: &Path, install_devices: &[String], boot_device: &str)
    -> Result<()> {
        self.record(format!("grub1_install {} {boot_device}", install_devices.join(",")))
    }

    fn grub2_cfg(&self, _chroot: &Path, kernel_params: &str, timeout: u32) -> Result<()> {
        self.record(format!("grub2_cfg {timeout} {kernel_params}"))
    }

    fn grub2_install(&self, _chroot: &Path, install_devices: &[String]) -> Result<()> {
        self.record(format!("grub2_install {}", install_devices.join(",")))
    }
}

impl ImageOps for FakeSystem {
    fn copy_image(&self, uri: &str, container: Container, target: &str) -> Result<u64> {
        self.record(format!("copy_image {uri} {container} {target}"))?;
        Ok(1024)
    }

    fn calculate_md5(&self, path: &str, size: u64) -> Result<String> {
        self.record(format!("calculate_md5 {path} {size}"))?;
        Ok(self
            .state()
            .md5
            .get(path)
            .cloned()
            .unwrap_or_else(|| format!("md5-{size}")))
    }

    fn fetch_text(&self, uri: &str) -> Result<String> {
        self.record(format!("fetch_text {uri}"))?;
        self.state()
            .documents
            .get(uri)
            .cloned()
            .ok_or_else(|| ProvisionError::HttpUrlConnection {
                url: uri.to_string(),
                reason: "404".to_string(),
            })
    }

    fn sync_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        self.record(format!("sync_tree {} {}", src.display(), dst.display()))
    }

    fn containerize(&self, src: &Path, container: Container, dst: &Path) -> Result<()> {
        self.record(format!("containerize {} {container} {}", src.display(), dst.display()))?;
        std::fs::copy(src, dst).map_err(|e| ProvisionError::io(dst, e))?;
        std::fs::remove_file(src).map_err(|e| ProvisionError::io(src, e))
    }
}

impl HostOps for FakeSystem {
    fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        self.record("list_block_devices".to_string())?;
        Ok(self.state().block_devices.clone())
    }

    fn device_links(&self, device: &str) -> Result<Vec<String>> {
        Ok(self.state().links.get(device).cloned().unwrap_or_default())
    }

    fn is_multipath_device(&self, device: &str) -> Result<bool> {
        Ok(self.state().multipath.contains(device))
    }

    fn is_block_device(&self, path: &str) -> bool {
        !self.state().not_block_devices.contains(path)
    }

    fn path_exists(&self, path: &str) -> bool {
        !self.state().missing_paths.contains(path)
    }

    fn blacklist_udev_rules(&self, _rules: &UdevBlacklist) -> Result<()> {
        self.record("blacklist_udev_rules".to_string())
    }

    fn unblacklist_udev_rules(&self, _rules: &UdevBlacklist) -> Result<()> {
        self.record("unblacklist_udev_rules".to_string())
    }

    fn udev_settle_blocks(&self) -> Result<()> {
        self.record("udev_settle_blocks".to_string())
    }

    fn refresh_multipath(&self) -> Result<()> {
        self.record("refresh_multipath".to_string())
    }

    fn zero_range(&self, device: &str, seek: u64, count: u64, tolerate_end: bool) -> Result<()> {
        self.record(format!("zero_range {device} {seek} {count} {tolerate_end}"))
    }

    fn block_device_size(&self, device: &str) -> Result<u64> {
        self.record(format!("block_device_size {device}"))?;
        Ok(self.state().device_size)
    }

    fn chroot_mounts(&self, chroot: &Path) -> Result<String> {
        self.record(format!("chroot_mounts {}", chroot.display()))?;
        Ok("/dev/sda3 / ext4 rw 0 0\n".to_string())
    }

    fn stop_chrooted_processes(&self, chroot: &Path, signal: StopSignal) -> bool {
        let _ = self.record(format!("stop_chrooted_processes {} {signal:?}", chroot.display()));
        self.state().processes_stop
    }

    fn create_sparse_file(&self, dir: &Path, suffix: &str, size: u64) -> Result<PathBuf> {
        let index = {
            let mut state = self.state();
            state.next_loop += 1;
            state.next_loop
        };
        let path = dir.join(format!("image{index}{suffix}"));
        self.record(format!("create_sparse_file {} {size}", path.display()))?;
        std::fs::write(&path, b"raw image").map_err(|e| ProvisionError::io(&path, e))?;
        Ok(path)
    }

    fn attach_loop(&self, file: &Path) -> Result<String> {
        let index = self.state().calls_named_count("attach_loop");
        self.record(format!("attach_loop {}", file.display()))?;
        Ok(format!("/dev/loop{index}"))
    }

    fn detach_loop(&self, device: &str) -> Result<()> {
        self.record(format!("detach_loop {device}"))
    }

    fn reboot(&self) -> Result<()> {
        self.record("reboot".to_string())
    }
}

impl FakeState {
    fn calls_named_count(&self, name: &str) -> usize {
        self.calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(name))
            .count()
    }
}

impl RootfsInstaller for FakeSystem {
    fn install(&self, chroot: &Path, os: &OperatingSystem) -> Result<()> {
        self.record(format!(
            "install {} {}",
            chroot.display(),
            os.packages.join(",")
        ))
    }
}

/// Configuration rooted in a scratch directory.
pub fn config(scratch: &Path) -> AgentConfig {
    AgentConfig {
        tmp_path: scratch.join("tmp"),
        config_drive_path: scratch.join("config-drive.img"),
        image_build_dir: scratch.join("build"),
        target_root: scratch.join("target"),
        ..AgentConfig::default()
    }
}

/// Pre-resolved single-disk layout: bios_grub, /boot, an imaged root, an
/// LVM swap and a configdrive partition.
pub fn partitioning() -> Value {
    let partition = |count: u32, begin: u64, end: u64| {
        json!({
            "name": format!("/dev/sda{count}"),
            "count": count,
            "device": "/dev/sda",
            "begin": begin,
            "end": end,
            "partition_type": "primary"
        })
    };
    let mut bios_grub = partition(1, 1, 25);
    bios_grub["flags"] = json!(["bios_grub"]);
    let mut configdrive = partition(5, 12225, 12245);
    configdrive["configdrive"] = json!(true);

    json!({
        "parteds": [{
            "name": "/dev/sda",
            "label": "gpt",
            "install_bootloader": true,
            "partitions": [
                bios_grub,
                partition(2, 25, 225),
                partition(3, 225, 10225),
                partition(4, 10225, 12225),
                configdrive
            ]
        }],
        "pvs": [{"name": "/dev/sda4", "metadatasize": 64, "metadatacopies": 2}],
        "vgs": [{"name": "os", "pvnames": ["/dev/sda4"]}],
        "lvs": [{"name": "swap", "vgname": "os", "size": 1000}],
        "fss": [
            {"device": "/dev/sda2", "mount": "/boot", "fs_type": "ext2"},
            {"device": "/dev/sda3", "mount": "/", "fs_type": "ext4"},
            {"device": "/dev/mapper/os-swap", "mount": "swap", "fs_type": "swap"}
        ]
    })
}

pub fn node(partitioning: Value) -> Value {
    json!({
        "profile": "ubuntu_1404_x86_64",
        "hostname": "node-1.domain.tld",
        "name_servers": "\"10.20.0.2\"",
        "interfaces": {
            "eth0": {"mac_address": "08:00:27:79:da:80", "ip_address": "10.20.0.3", "netmask": "255.255.255.0"}
        },
        "kernel_options": {"netcfg/choose_interface": "08:00:27:79:da:80"},
        "ks_meta": {
            "master_ip": "10.20.0.2",
            "image_data": {
                "/": {"uri": "file:///srv/images/root.img", "format": "ext4", "container": "raw"}
            },
            "pm_data": {"kernel_params": "console=ttyS0", "ks_spaces": []}
        },
        "partitioning": partitioning
    })
}

pub fn driver_for_node(node: Value, metadata: &ImageMetadata) -> Driver {
    let data: SimpleData = serde_json::from_value(node).expect("simple node data");
    let options = AgentConfig::default().layout_options();
    Driver::Simple(Nailgun::from_partitioning(&data, metadata, &options).expect("simple plan"))
}

pub fn simple_driver(partitioning: Value, metadata: &ImageMetadata) -> Driver {
    driver_for_node(node(partitioning), metadata)
}

pub fn manager(fake: &FakeSystem, driver: Driver, config: AgentConfig) -> Manager {
    Manager::new(driver, fake.toolbox(), config)
}
