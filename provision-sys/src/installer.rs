// SPDX-License-Identifier: GPL-3.0-only

//! Debian-family root filesystem population with debootstrap and apt-get

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use provision_contracts::{
    CommandExecutor, CommandSpec, ProvisionError, Result, RetryPolicy, RootfsInstaller,
};
use provision_types::{OperatingSystem, Repo, SchemeError};

/// Mirrors are flaky; package tools get several tries.
const APT_RETRY: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(2));

const POLICY_RC_D: &str = "#!/bin/sh\n# prevent any service from being started\nexit 101\n";

pub struct DebootstrapInstaller {
    executor: Arc<dyn CommandExecutor>,
}

fn sources_entry(repo: &Repo) -> Result<String> {
    let suite = repo.suite.as_deref().ok_or_else(|| {
        SchemeError::WrongInputData(format!("repository {} has no suite", repo.name))
    })?;
    let mut line = format!("deb {} {}", repo.uri, suite);
    if let Some(section) = repo.section.as_deref().filter(|section| !section.is_empty()) {
        line.push(' ');
        line.push_str(section);
    }
    line.push('\n');
    Ok(line)
}

fn preferences_entry(repo: &Repo) -> Option<String> {
    let priority = repo.priority?;
    let suite = repo.suite.as_deref()?;
    Some(format!(
        "Package: *\nPin: release a={suite}\nPin-Priority: {priority}\n"
    ))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| ProvisionError::io(parent, error))?;
    }
    std::fs::write(path, contents).map_err(|error| ProvisionError::io(path, error))
}

impl DebootstrapInstaller {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn apt_get(&self, chroot: &str, args: &[&str]) -> Result<()> {
        let spec = CommandSpec::new("chroot")
            .args([chroot, "apt-get", "-y"])
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .env("DEBCONF_NONINTERACTIVE_SEEN", "true")
            .retry(APT_RETRY);
        let output = self.executor.execute(&spec)?;
        tracing::debug!("Running apt-get {:?} completed: {}", args, output.stdout.trim());
        Ok(())
    }

    fn configure_repos(&self, chroot: &Path, repos: &[Repo]) -> Result<()> {
        for repo in repos {
            write_file(
                &chroot.join(format!("etc/apt/sources.list.d/{}.list", repo.name)),
                &sources_entry(repo)?,
            )?;
            if let Some(pin) = preferences_entry(repo) {
                write_file(
                    &chroot.join(format!("etc/apt/preferences.d/{}.pref", repo.name)),
                    &pin,
                )?;
            }
        }
        Ok(())
    }
}

impl RootfsInstaller for DebootstrapInstaller {
    fn install(&self, chroot: &Path, os: &OperatingSystem) -> Result<()> {
        let Some(base) = os.repos.first() else {
            return Err(SchemeError::WrongInputData(
                "at least one repository is required to build an image".to_string(),
            )
            .into());
        };
        let suite = base.suite.as_deref().ok_or_else(|| {
            SchemeError::WrongInputData(format!("repository {} has no suite", base.name))
        })?;
        let chroot_arg = chroot.display().to_string();

        tracing::info!("Running debootstrap {} from {}", suite, base.uri);
        self.executor.execute(
            &CommandSpec::new("debootstrap")
                .args(["--verbose", "--no-check-gpg", "--arch=amd64"])
                .args([suite, chroot_arg.as_str(), base.uri.as_str()])
                .retry(APT_RETRY),
        )?;

        let policy = chroot.join("usr/sbin/policy-rc.d");
        write_file(&policy, POLICY_RC_D)?;
        std::fs::set_permissions(&policy, std::fs::Permissions::from_mode(0o755))
            .map_err(|error| ProvisionError::io(&policy, error))?;

        // debootstrap leaves its own sources.list behind
        let default_sources = chroot.join("etc/apt/sources.list");
        if default_sources.exists() {
            std::fs::remove_file(&default_sources)
                .map_err(|error| ProvisionError::io(&default_sources, error))?;
        }
        self.configure_repos(chroot, &os.repos)?;

        self.apt_get(&chroot_arg, &["update"])?;
        self.apt_get(&chroot_arg, &["dist-upgrade"])?;
        if !os.packages.is_empty() {
            let mut args = vec!["install"];
            args.extend(os.packages.iter().map(String::as_str));
            self.apt_get(&chroot_arg, &args)?;
        }

        std::fs::remove_file(&policy).map_err(|error| ProvisionError::io(&policy, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(section: Option<&str>, priority: Option<u32>) -> Repo {
        Repo {
            name: "ubuntu".to_string(),
            uri: "http://archive.ubuntu.com/ubuntu".to_string(),
            suite: Some("trusty".to_string()),
            section: section.map(ToString::to_string),
            priority,
        }
    }

    #[test]
    fn renders_sources_line() {
        assert_eq!(
            sources_entry(&repo(Some("main universe"), None)).expect("entry"),
            "deb http://archive.ubuntu.com/ubuntu trusty main universe\n"
        );
        assert_eq!(
            sources_entry(&repo(None, None)).expect("flat repo"),
            "deb http://archive.ubuntu.com/ubuntu trusty\n"
        );
    }

    #[test]
    fn pins_only_prioritized_repos() {
        assert!(preferences_entry(&repo(None, None)).is_none());
        assert_eq!(
            preferences_entry(&repo(None, Some(1050))).expect("pin"),
            "Package: *\nPin: release a=trusty\nPin-Priority: 1050\n"
        );
    }

    #[test]
    fn repository_without_suite_is_rejected() {
        let mut flat = repo(None, None);
        flat.suite = None;
        assert!(sources_entry(&flat).is_err());
    }
}
