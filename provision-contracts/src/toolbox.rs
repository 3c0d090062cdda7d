// SPDX-License-Identifier: GPL-3.0-only

use crate::traits::{
    BootloaderOps, FilesystemOps, HostOps, ImageOps, LogicalOps, PartitionOps, RootfsInstaller,
};

/// Every collaborator the pipeline drives, resolved once at startup.
pub struct Toolbox {
    pub fs: Box<dyn FilesystemOps>,
    pub partitions: Box<dyn PartitionOps>,
    pub logical: Box<dyn LogicalOps>,
    pub bootloader: Box<dyn BootloaderOps>,
    pub images: Box<dyn ImageOps>,
    pub host: Box<dyn HostOps>,
    pub installer: Box<dyn RootfsInstaller>,
}
