// SPDX-License-Identifier: GPL-3.0-only

//! Files written into a mounted target and helpers for temporary mounts

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use provision_contracts::{ProvisionError, Result};
use provision_types::{ConfigDriveCommon, DeviceRef, FileSystem, SchemeError};

pub const UDEV_NET_RULES: &str = "etc/udev/rules.d/70-persistent-net.rules";

/// `mount` re-rooted below `chroot`.
pub fn under_chroot(chroot: &Path, mount: &str) -> PathBuf {
    chroot.join(mount.trim_start_matches('/'))
}

/// Create a uniquely named directory below `parent`.
pub fn make_temp_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let dir = parent.join(format!("{}{}", prefix, uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).map_err(|e| ProvisionError::io(&dir, e))?;
    Ok(dir)
}

/// Remove an emptied mountpoint, logging instead of failing.
pub fn remove_mountpoint(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        tracing::debug!("Directory {} can not be removed: {}", dir.display(), e);
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| ProvisionError::io(path, e))
}

/// One line per mounted filesystem, keyed by the UUID probed on its device.
pub fn render_fstab(fss: &[FileSystem], uuids: &HashMap<DeviceRef, String>) -> Result<String> {
    let mut fstab = String::new();
    for fs in fss {
        let Some(mount) = fs.mount.as_deref() else {
            tracing::debug!("Skipping fstab entry for {}", fs.device);
            continue;
        };
        let uuid = uuids.get(&fs.device).ok_or_else(|| {
            SchemeError::wrong_scheme(format!("no UUID found for file system mounted at {mount}"))
        })?;
        let options = if mount == "/" {
            "defaults,errors=panic"
        } else {
            "defaults"
        };
        fstab.push_str(&format!("UUID={uuid} {mount} {} {options} 0 0\n", fs.fs_type));
    }
    Ok(fstab)
}

pub fn write_fstab(chroot: &Path, fstab: &str) -> Result<()> {
    write_file(&chroot.join("etc/fstab"), fstab)
}

/// Replace the target's mtab (often a symlink) with `mounts`.
pub fn write_mtab(chroot: &Path, mounts: &str) -> Result<()> {
    let mtab = chroot.join("etc/mtab");
    if mtab.is_symlink() {
        std::fs::remove_file(&mtab).map_err(|e| ProvisionError::io(&mtab, e))?;
    }
    write_file(&mtab, mounts)
}

/// Pin interface names to MAC addresses.
pub fn write_udev_net_rules(chroot: &Path, rules: &[(String, String)]) -> Result<()> {
    if rules.is_empty() {
        tracing::debug!("No udev network rules to write");
        return Ok(());
    }
    let mut contents = String::from("# Generated during provisioning\n");
    for (mac, name) in rules {
        contents.push_str(&format!(
            "SUBSYSTEM==\"net\", ACTION==\"add\", DRIVERS==\"?*\", ATTR{{address}}==\"{mac}\", \
             ATTR{{type}}==\"1\", KERNEL==\"eth*\", NAME=\"{name}\"\n"
        ));
    }
    tracing::debug!("Writing {} udev network rules", rules.len());
    write_file(&chroot.join(UDEV_NET_RULES), &contents)
}

/// Static configuration for the admin interface, so the node is reachable
/// before cloud-init runs.
pub fn write_admin_nic(chroot: &Path, common: &ConfigDriveCommon) -> Result<()> {
    let (Some(iface), Some(ip), Some(mask)) = (
        common.admin_iface_name.as_deref(),
        common.admin_ip.as_deref(),
        common.admin_mask.as_deref(),
    ) else {
        tracing::warn!("Admin interface is not fully described, leaving network config alone");
        return Ok(());
    };
    let mut stanza = format!("auto {iface}\niface {iface} inet static\n\taddress {ip}\n\tnetmask {mask}\n");
    if let Some(gw) = common.gw.as_deref() {
        stanza.push_str(&format!("\tgateway {gw}\n"));
    }
    write_file(
        &chroot.join(format!("etc/network/interfaces.d/ifcfg-{iface}")),
        &stanza,
    )
}

/// `("/var", "lib")` for `/var/lib`, `("/", "var")` for `/var`.
fn split_mount(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(index) => (&path[..index], &path[index + 1..]),
        None => ("", path),
    }
}

/// Move files baked into a parent image to the filesystem mounted below it.
///
/// `mounts` maps mount points to the directories they are mounted on. For
/// each nested mount point the closest ancestor mount that holds a matching
/// subtree gives up its copy: `sync` copies it over, and with `remove_src`
/// the source is deleted.
pub fn relocate_nested_files<F>(
    mounts: &BTreeMap<String, PathBuf>,
    remove_src: bool,
    mut sync: F,
) -> Result<()>
where
    F: FnMut(&Path, &Path) -> Result<()>,
{
    for (fs_mount, fs_dir) in mounts {
        tracing::debug!("Trying to move files for {} file system", fs_mount);
        let (mut head, tail) = split_mount(fs_mount);
        let mut tail = PathBuf::from(tail);

        while head != fs_mount && !head.is_empty() {
            if let Some(head_dir) = mounts.get(head) {
                let check = head_dir.join(&tail);
                if check.exists() {
                    tracing::debug!(
                        "Syncing files from {} to {}",
                        check.display(),
                        fs_dir.display()
                    );
                    sync(&check, fs_dir)?;
                    if remove_src {
                        std::fs::remove_dir_all(&check)
                            .map_err(|e| ProvisionError::io(&check, e))?;
                    }
                    break;
                }
            }
            if head == "/" {
                break;
            }
            let (parent, name) = split_mount(head);
            tail = Path::new(name).join(tail);
            head = parent;
        }
    }
    Ok(())
}
