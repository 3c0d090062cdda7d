// SPDX-License-Identifier: GPL-3.0-only

//! Target operating system, bootloader and configdrive settings

use serde::{Deserialize, Serialize};

pub const DEFAULT_KERNEL_REGEXP: &str = r"^vmlinuz.*";
pub const DEFAULT_INITRD_REGEXP: &str = r"^(initrd|initramfs).*";

/// Release reference as published in image metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub name: String,
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

/// Distribution release whose default bootloader is legacy grub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyGrubRelease {
    pub name: String,
    pub major: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystem {
    /// Lowercase distribution name, `None` when unknown
    pub name: Option<String>,
    pub major: Option<u32>,
    pub minor: Option<u32>,
    #[serde(default)]
    pub repos: Vec<Repo>,
    #[serde(default)]
    pub packages: Vec<String>,
}

impl OperatingSystem {
    pub fn release(name: &str, major: u32, minor: u32) -> Self {
        Self {
            name: Some(name.to_ascii_lowercase()),
            major: Some(major),
            minor: Some(minor),
            ..Self::default()
        }
    }

    pub fn generic() -> Self {
        Self::default()
    }

    pub fn is(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(name))
    }

    pub fn matches_any(&self, releases: &[LegacyGrubRelease]) -> bool {
        releases
            .iter()
            .any(|release| self.is(&release.name) && self.major == Some(release.major))
    }

    pub fn to_release(&self) -> Option<OsRelease> {
        Some(OsRelease {
            name: self.name.clone()?,
            major: self.major?,
            minor: self.minor.unwrap_or(0),
        })
    }
}

/// Bootloader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grub {
    pub version: u8,
    #[serde(default)]
    pub kernel_params: String,
    #[serde(default)]
    pub kernel_name: Option<String>,
    #[serde(default)]
    pub initrd_name: Option<String>,
    pub kernel_regexp: String,
    pub initrd_regexp: String,
}

impl Default for Grub {
    fn default() -> Self {
        Self {
            version: 2,
            kernel_params: String::new(),
            kernel_name: None,
            initrd_name: None,
            kernel_regexp: DEFAULT_KERNEL_REGEXP.to_string(),
            initrd_regexp: DEFAULT_INITRD_REGEXP.to_string(),
        }
    }
}

impl Grub {
    pub fn append_kernel_params(&mut self, params: &str) {
        let params = params.trim();
        if params.is_empty() {
            return;
        }
        if !self.kernel_params.is_empty() {
            self.kernel_params.push(' ');
        }
        self.kernel_params.push_str(params);
    }
}

/// Node bootstrap data rendered into the configdrive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDriveCommon {
    pub hostname: String,
    pub fqdn: String,
    #[serde(default)]
    pub ssh_auth_keys: Vec<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(default)]
    pub search_domain: Vec<String>,
    #[serde(default)]
    pub master_ip: Option<String>,
    #[serde(default)]
    pub master_url: Option<String>,
    /// Comma separated `mac_name` pairs
    #[serde(default)]
    pub udevrules: Option<String>,
    #[serde(default)]
    pub admin_mac: Option<String>,
    #[serde(default)]
    pub admin_ip: Option<String>,
    #[serde(default)]
    pub admin_mask: Option<String>,
    #[serde(default)]
    pub admin_iface_name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub gw: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDriveScheme {
    pub common: ConfigDriveCommon,
    #[serde(default)]
    pub profile: Option<String>,
}

impl ConfigDriveScheme {
    /// `(mac, interface name)` pairs from the udev rules string.
    pub fn udev_rules(&self) -> Vec<(String, String)> {
        self.common
            .udevrules
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|rule| {
                let (mac, name) = rule.trim().split_once('_')?;
                if mac.is_empty() || name.is_empty() {
                    return None;
                }
                Some((mac.to_string(), name.to_string()))
            })
            .collect()
    }
}
