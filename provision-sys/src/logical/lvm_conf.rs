// SPDX-License-Identifier: GPL-3.0-only

//! Editing the `devices` section of an lvm.conf dump

use std::path::{Path, PathBuf};

use provision_contracts::{LvmDevicesConfig, ProvisionError, Result};

/// Options from `devices` that carry a value, in the order they are applied.
pub fn device_overrides(devices: &LvmDevicesConfig) -> Vec<(&'static str, Vec<String>)> {
    [
        ("scan", &devices.scan),
        ("global_filter", &devices.global_filter),
        ("preferred_names", &devices.preferred_names),
    ]
    .into_iter()
    .filter(|(_, values)| !values.is_empty())
    .map(|(name, values)| (name, values.clone()))
    .collect()
}

fn dump_value(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|value| format!("\"{value}\"")).collect();
    format!("[{}]", quoted.join(", "))
}

fn option_name(line: &str) -> Option<&str> {
    line.split_once('=').map(|(name, _)| name.trim())
}

/// Set `section/name` in a dumped configuration.
///
/// An existing option is overwritten in place, a missing one is appended to
/// its section, and a missing section is appended to the end.
pub fn update_option(raw: &str, section: &str, name: &str, values: &[String]) -> String {
    let mut lines: Vec<String> = raw.lines().map(ToString::to_string).collect();
    let entry = format!("\t{name}={}", dump_value(values));
    let header = format!("{section} ");

    let Some(start) = lines
        .iter()
        .position(|line| line.trim().starts_with(&header))
    else {
        lines.push(format!("{section} {{\n{entry}\n}}"));
        return lines.join("\n");
    };

    for index in start..lines.len() {
        let trimmed = lines[index].trim();
        if trimmed.ends_with('}') {
            lines[index] = format!("{entry}\n}}");
            return lines.join("\n");
        }
        if option_name(trimmed) == Some(name) {
            lines[index] = entry;
            return lines.join("\n");
        }
    }

    lines.push(format!("{entry}\n}}"));
    lines.join("\n")
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S");
    PathBuf::from(format!("{}.bak.{stamp}", path.display()))
}

/// Write `contents` to `path`, then replace it with lvm's own re-dump.
///
/// When lvm cannot parse the result the original file is restored.
pub fn write_checked<F>(path: &Path, contents: &str, redump: F) -> Result<()>
where
    F: Fn() -> Result<String>,
{
    let backup = backup_path(path);
    std::fs::copy(path, &backup).map_err(|error| ProvisionError::io(path, error))?;
    tracing::debug!("Backup for origin LVM configuration file: {}", backup.display());
    std::fs::write(path, contents).map_err(|error| ProvisionError::io(path, error))?;

    match redump() {
        Ok(current) => {
            std::fs::write(path, current).map_err(|error| ProvisionError::io(path, error))
        }
        Err(error) => {
            std::fs::rename(&backup, path).map_err(|error| ProvisionError::io(path, error))?;
            tracing::debug!("LVM configuration {} restored", path.display());
            Err(error)
        }
    }
}
