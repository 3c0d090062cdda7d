// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use provision_types::OperatingSystem;

use crate::Result;

/// Populates a mounted chroot with an operating system.
pub trait RootfsInstaller: Send + Sync {
    fn install(&self, chroot: &Path, os: &OperatingSystem) -> Result<()>;
}
