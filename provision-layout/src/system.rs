// SPDX-License-Identifier: GPL-3.0-only

//! Operating system, bootloader and configdrive settings derived from the
//! node data

use provision_types::{
    ConfigDriveCommon, ConfigDriveScheme, Grub, ImageMetadata, LegacyGrubRelease,
    OperatingSystem,
};

use crate::input::ProvisionData;

pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";
const ADMIN_INTERFACE_OPTION: &str = "netcfg/choose_interface";

const CENTOS_26_KERNEL_REGEXP: &str = r"^vmlinuz-2\.6.*";
const CENTOS_26_INITRD_REGEXP: &str = r"^initramfs-2\.6.*";

/// Release guessed from a provisioning profile name such as
/// `ubuntu_1404_x86_64`.
pub fn os_by_profile(profile: &str) -> OperatingSystem {
    let profile = profile.to_ascii_lowercase();
    if profile.contains("centos") {
        if profile.contains('7') {
            OperatingSystem::release("centos", 7, 0)
        } else {
            OperatingSystem::release("centos", 6, 5)
        }
    } else if profile.contains("ubuntu") {
        if profile.contains("1404") {
            OperatingSystem::release("ubuntu", 14, 4)
        } else {
            OperatingSystem::release("ubuntu", 12, 4)
        }
    } else {
        OperatingSystem::generic()
    }
}

/// Image metadata wins over the profile when it names a release.
pub fn operating_system(data: &ProvisionData, metadata: &ImageMetadata) -> OperatingSystem {
    if let Some(release) = &metadata.os {
        tracing::debug!(
            "Operating system {} {}.{} taken from image metadata",
            release.name,
            release.major,
            release.minor
        );
        return OperatingSystem::release(&release.name, release.major, release.minor);
    }
    let os = os_by_profile(&data.profile);
    tracing::debug!("Operating system {:?} guessed from profile {}", os.name, data.profile);
    os
}

pub fn grub(
    data: &ProvisionData,
    os: &OperatingSystem,
    legacy_releases: &[LegacyGrubRelease],
) -> Grub {
    let mut grub = Grub::default();
    grub.append_kernel_params(&data.pm_data().kernel_params);
    if data.profile.to_ascii_lowercase().contains("centos") && !data.ks_meta.wants_lt_kernel() {
        tracing::debug!("Preferred kernel version is 2.6");
        grub.kernel_regexp = CENTOS_26_KERNEL_REGEXP.to_string();
        grub.initrd_regexp = CENTOS_26_INITRD_REGEXP.to_string();
    }
    grub.version = if os.matches_any(legacy_releases) { 1 } else { 2 };
    tracing::debug!("Grub version is {}", grub.version);
    grub
}

/// `"10.20.0.2", "10.20.0.3"` style lists as sent by the orchestrator.
fn split_quoted(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|item| item.trim().trim_matches('"').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn configdrive_scheme(data: &ProvisionData) -> ConfigDriveScheme {
    let meta = &data.ks_meta;

    let admin_mac = data.kernel_options.get(ADMIN_INTERFACE_OPTION).cloned();
    let admin = admin_mac.as_deref().and_then(|mac| {
        data.interfaces
            .iter()
            .find(|(_, iface)| iface.mac_address.eq_ignore_ascii_case(mac))
    });
    if admin.is_none() {
        tracing::warn!("Admin interface {:?} not found among node interfaces", admin_mac);
    }

    let mut ssh_auth_keys = meta.authorized_keys.clone();
    if let Some(key) = meta.auth_key.as_deref().filter(|k| !k.is_empty()) {
        ssh_auth_keys.push(key.to_string());
    }

    let udevrules = data.kernel_options.get("udevrules").cloned().or_else(|| {
        let rules: Vec<String> = data
            .interfaces
            .iter()
            .map(|(name, iface)| format!("{}_{}", iface.mac_address, name))
            .collect();
        (!rules.is_empty()).then(|| rules.join(","))
    });

    ConfigDriveScheme {
        common: ConfigDriveCommon {
            hostname: data.hostname.clone(),
            fqdn: data.hostname.clone(),
            ssh_auth_keys,
            name_servers: split_quoted(data.name_servers.as_deref()),
            search_domain: split_quoted(data.name_servers_search.as_deref()),
            master_ip: meta.master_ip.clone(),
            master_url: meta.master_ip.as_ref().map(|ip| format!("http://{ip}:8000/api")),
            udevrules,
            admin_mac,
            admin_ip: admin.and_then(|(_, iface)| iface.ip_address.clone()),
            admin_mask: admin.and_then(|(_, iface)| iface.netmask.clone()),
            admin_iface_name: admin.map(|(name, _)| name.clone()),
            timezone: Some(
                meta.timezone
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            ),
            gw: meta.gw.clone(),
        },
        profile: Some(data.profile.clone()).filter(|p| !p.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Interface;
    use provision_types::OsRelease;

    fn legacy() -> Vec<LegacyGrubRelease> {
        vec![LegacyGrubRelease {
            name: "centos".to_string(),
            major: 6,
        }]
    }

    #[test]
    fn profile_names_map_to_releases() {
        assert_eq!(os_by_profile("base-centos-x86_64"), OperatingSystem::release("centos", 6, 5));
        assert_eq!(os_by_profile("base-centos7-x86_64"), OperatingSystem::release("centos", 7, 0));
        assert_eq!(
            os_by_profile("base-ubuntu_1404_x86_64"),
            OperatingSystem::release("ubuntu", 14, 4)
        );
        assert_eq!(os_by_profile("ubuntu_1204"), OperatingSystem::release("ubuntu", 12, 4));
        assert_eq!(os_by_profile("pro_fi-le"), OperatingSystem::generic());
    }

    #[test]
    fn image_metadata_overrides_profile() {
        let data = ProvisionData {
            profile: "base-centos-x86_64".to_string(),
            ..ProvisionData::default()
        };
        let metadata = ImageMetadata {
            os: Some(OsRelease {
                name: "Ubuntu".to_string(),
                major: 16,
                minor: 4,
            }),
            ..ImageMetadata::default()
        };
        assert_eq!(operating_system(&data, &metadata), OperatingSystem::release("ubuntu", 16, 4));
    }

    #[test]
    fn centos6_gets_legacy_grub_and_26_kernel() {
        let mut data = ProvisionData {
            profile: "base-centos-x86_64".to_string(),
            ..ProvisionData::default()
        };
        data.ks_meta.pm_data.kernel_params = "console=ttyS0,9600 console=tty0".to_string();
        let os = os_by_profile(&data.profile);

        let settings = grub(&data, &os, &legacy());
        assert_eq!(settings.version, 1);
        assert_eq!(settings.kernel_regexp, CENTOS_26_KERNEL_REGEXP);
        assert_eq!(settings.initrd_regexp, CENTOS_26_INITRD_REGEXP);
        assert_eq!(settings.kernel_params, "console=ttyS0,9600 console=tty0");

        data.ks_meta.kernel_lt = Some(serde_json::json!(1));
        let lt = grub(&data, &os, &legacy());
        assert_eq!(lt.kernel_regexp, Grub::default().kernel_regexp);
    }

    #[test]
    fn centos7_uses_grub2() {
        let data = ProvisionData {
            profile: "base-centos7-x86_64".to_string(),
            ..ProvisionData::default()
        };
        let os = os_by_profile(&data.profile);
        assert_eq!(grub(&data, &os, &legacy()).version, 2);
    }

    #[test]
    fn configdrive_common_settings() {
        let mut data = ProvisionData {
            profile: "pro_fi-le".to_string(),
            hostname: "node-1.domain.tld".to_string(),
            name_servers: Some("\"10.20.0.2\"".to_string()),
            name_servers_search: Some("\"domain.tld\"".to_string()),
            ..ProvisionData::default()
        };
        for (name, mac, ip) in [
            ("eth0", "08:00:27:79:da:80", Some("10.20.0.3")),
            ("eth1", "08:00:27:46:43:60", None),
            ("eth2", "08:00:27:b1:d7:15", None),
        ] {
            data.interfaces.insert(
                name.to_string(),
                Interface {
                    mac_address: mac.to_string(),
                    ip_address: ip.map(str::to_string),
                    netmask: ip.map(|_| "255.255.255.0".to_string()),
                },
            );
        }
        data.kernel_options
            .insert(ADMIN_INTERFACE_OPTION.to_string(), "08:00:27:79:da:80".to_string());
        data.ks_meta.authorized_keys = vec!["key1".to_string(), "key2".to_string()];
        data.ks_meta.auth_key = Some("auth".to_string());
        data.ks_meta.master_ip = Some("10.20.0.2".to_string());

        let scheme = configdrive_scheme(&data);
        let common = &scheme.common;
        assert_eq!(common.ssh_auth_keys, vec!["key1", "key2", "auth"]);
        assert_eq!(common.fqdn, "node-1.domain.tld");
        assert_eq!(common.name_servers, vec!["10.20.0.2"]);
        assert_eq!(common.search_domain, vec!["domain.tld"]);
        assert_eq!(common.master_url.as_deref(), Some("http://10.20.0.2:8000/api"));
        assert_eq!(
            common.udevrules.as_deref(),
            Some("08:00:27:79:da:80_eth0,08:00:27:46:43:60_eth1,08:00:27:b1:d7:15_eth2")
        );
        assert_eq!(common.admin_ip.as_deref(), Some("10.20.0.3"));
        assert_eq!(common.admin_mask.as_deref(), Some("255.255.255.0"));
        assert_eq!(common.admin_iface_name.as_deref(), Some("eth0"));
        assert_eq!(common.timezone.as_deref(), Some(DEFAULT_TIMEZONE));
        assert_eq!(scheme.profile.as_deref(), Some("pro_fi-le"));
    }
}
