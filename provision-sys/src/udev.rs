// SPDX-License-Identifier: GPL-3.0-only

//! udev rule blacklisting while partition tables are rewritten
//!
//! parted fires a burst of udev events per change. Library rules are shadowed
//! by symlinks to an empty rule in the admin rules directory; admin rules that
//! would collide are parked under a rename suffix and restored afterwards.

use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use provision_contracts::UdevBlacklist;

use crate::error::Result;

const RULES_SUFFIX: &str = ".rules";

fn empty_rule_path(rules: &UdevBlacklist) -> PathBuf {
    let name = Path::new(&rules.empty_rule)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&rules.empty_rule));
    rules.rules_dir.join(name)
}

fn file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

/// Shadow every library rule. Returns the number of rules blacklisted.
pub fn blacklist(rules: &UdevBlacklist) -> Result<usize> {
    tracing::debug!("Enabling udev's rules blacklisting");
    let empty_rule = empty_rule_path(rules);
    std::fs::write(&empty_rule, "#\n")?;

    let mut shadowed = 0;
    for rule in file_names(&rules.rules_lib_dir)? {
        let Some(stem) = rule.strip_suffix(RULES_SUFFIX) else {
            continue;
        };
        let dst = rules.rules_dir.join(&rule);
        if dst.is_dir() {
            continue;
        }
        if dst.symlink_metadata().is_ok() {
            let parked = rules.rules_dir.join(format!("{stem}{}", rules.rename_substr));
            if let Err(error) = std::fs::rename(&dst, &parked) {
                tracing::debug!("Skipping udev rule {} blacklisting: {}", dst.display(), error);
                continue;
            }
        }
        symlink(&empty_rule, &dst)?;
        shadowed += 1;
    }
    Ok(shadowed)
}

/// Drop the shadowing symlinks and bring parked admin rules back.
pub fn unblacklist(rules: &UdevBlacklist) -> Result<()> {
    tracing::debug!("Disabling udev's rules blacklisting");
    for rule in file_names(&rules.rules_dir)? {
        let src = rules.rules_dir.join(&rule);
        let Ok(metadata) = src.symlink_metadata() else {
            continue;
        };
        if metadata.is_dir() {
            continue;
        }
        if rule.ends_with(RULES_SUFFIX) {
            if metadata.file_type().is_symlink()
                && let Err(error) = std::fs::remove_file(&src)
            {
                tracing::debug!("Skipping udev rule {} de-blacklisting: {}", src.display(), error);
            }
        } else if let Some(stem) = rule.strip_suffix(rules.rename_substr.as_str()) {
            let restored = rules.rules_dir.join(format!("{stem}{RULES_SUFFIX}"));
            if let Err(error) = std::fs::rename(&src, &restored) {
                tracing::debug!("Skipping udev rule {} de-blacklisting: {}", src.display(), error);
            }
        }
    }
    Ok(())
}
