// SPDX-License-Identifier: GPL-3.0-only

//! cloud-init seed content rendered from the configdrive scheme

use std::path::Path;

use provision_contracts::{ProvisionError, Result};
use provision_types::ConfigDriveScheme;
use serde::Serialize;
use serde_json::json;

/// Location of the OpenStack-style seed inside a configdrive.
pub const CONFIGDRIVE_LATEST: &str = "openstack/latest";
/// Location of the NoCloud seed inside a root filesystem.
pub const NOCLOUD_SEED: &str = "var/lib/cloud/seed/nocloud";

fn is_empty(list: &&[String]) -> bool {
    list.is_empty()
}

#[derive(Debug, Serialize)]
struct ResolvConf<'a> {
    nameservers: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    searchdomains: &'a [String],
}

#[derive(Debug, Serialize)]
struct CloudConfig<'a> {
    hostname: &'a str,
    fqdn: &'a str,
    manage_etc_hosts: bool,
    disable_root: bool,
    ssh_pwauth: bool,
    #[serde(skip_serializing_if = "is_empty")]
    ssh_authorized_keys: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manage_resolv_conf: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolv_conf: Option<ResolvConf<'a>>,
}

pub fn meta_data(scheme: &ConfigDriveScheme) -> serde_json::Value {
    let common = &scheme.common;
    let public_keys: serde_json::Map<String, serde_json::Value> = common
        .ssh_auth_keys
        .iter()
        .enumerate()
        .map(|(index, key)| (index.to_string(), json!(key)))
        .collect();

    json!({
        "uuid": uuid::Uuid::new_v4().to_string(),
        "hostname": common.hostname,
        "name": common.fqdn,
        "public_keys": public_keys,
        "meta": {
            "master_ip": common.master_ip,
            "master_url": common.master_url,
            "admin_mac": common.admin_mac,
            "timezone": common.timezone,
            "profile": scheme.profile,
        },
    })
}

pub fn user_data(scheme: &ConfigDriveScheme) -> Result<String> {
    let common = &scheme.common;
    let has_resolvers = !common.name_servers.is_empty();
    let config = CloudConfig {
        hostname: &common.hostname,
        fqdn: &common.fqdn,
        manage_etc_hosts: true,
        disable_root: false,
        ssh_pwauth: false,
        ssh_authorized_keys: &common.ssh_auth_keys,
        timezone: common.timezone.as_deref(),
        manage_resolv_conf: has_resolvers.then_some(true),
        resolv_conf: has_resolvers.then_some(ResolvConf {
            nameservers: &common.name_servers,
            searchdomains: &common.search_domain,
        }),
    };
    let body = serde_yaml::to_string(&config)
        .map_err(|e| ProvisionError::serialization("cloud-config", e))?;
    Ok(format!("#cloud-config\n{body}"))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        tracing::error!("Failed to write {}: {}", path.display(), e);
        ProvisionError::TemplateWrite(path.display().to_string())
    })
}

/// Write meta data and user data into `dir` under the given file names.
pub fn write_seed(
    dir: &Path,
    scheme: &ConfigDriveScheme,
    meta_data_name: &str,
    user_data_name: &str,
) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;
    let meta = serde_json::to_string_pretty(&meta_data(scheme))
        .map_err(|e| ProvisionError::serialization("meta data", e))?;
    write(&dir.join(meta_data_name), &meta)?;
    write(&dir.join(user_data_name), &user_data(scheme)?)?;
    tracing::debug!("cloud-init seed written to {}", dir.display());
    Ok(())
}

/// OpenStack configdrive layout below `root`.
pub fn write_configdrive_seed(root: &Path, scheme: &ConfigDriveScheme) -> Result<()> {
    write_seed(
        &root.join(CONFIGDRIVE_LATEST),
        scheme,
        "meta_data.json",
        "user_data",
    )
}

/// NoCloud layout inside a mounted root filesystem.
pub fn write_nocloud_seed(root: &Path, scheme: &ConfigDriveScheme) -> Result<()> {
    write_seed(&root.join(NOCLOUD_SEED), scheme, "meta-data", "user-data")
}
