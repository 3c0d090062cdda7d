// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use provision_contracts::{CommandExecutor, Sleeper, ThreadSleeper, Toolbox};

use crate::exec::SystemExecutor;
use crate::fs_tools::FsTools;
use crate::grub_tools::GrubTools;
use crate::host::{HostSettings, HostTools};
use crate::image::{HttpSettings, ImageTools};
use crate::installer::DebootstrapInstaller;
use crate::logical::LogicalTools;
use crate::parted_tools::PartedTools;

/// Tunables for the host-backed toolbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSettings {
    pub http: HttpSettings,
    pub host: HostSettings,
    pub read_chunk_size: usize,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            host: HostSettings::default(),
            read_chunk_size: 1024 * 1024,
        }
    }
}

/// Wire every contract to the real system tools.
pub fn system_toolbox(settings: SystemSettings) -> Toolbox {
    let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);
    let executor: Arc<dyn CommandExecutor> =
        Arc::new(SystemExecutor::with_sleeper(sleeper.clone()));

    Toolbox {
        fs: Box::new(FsTools::new(executor.clone(), sleeper.clone())),
        partitions: Box::new(PartedTools::new(executor.clone())),
        logical: Box::new(LogicalTools::new(executor.clone())),
        bootloader: Box::new(GrubTools::new(executor.clone())),
        images: Box::new(ImageTools::new(
            executor.clone(),
            sleeper.clone(),
            settings.http,
            settings.read_chunk_size,
        )),
        host: Box::new(HostTools::new(executor.clone(), sleeper, settings.host)),
        installer: Box::new(DebootstrapInstaller::new(executor)),
    }
}
