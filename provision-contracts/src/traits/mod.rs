// SPDX-License-Identifier: GPL-3.0-only

pub mod bootloader;
pub mod command;
pub mod filesystem;
pub mod host;
pub mod image;
pub mod installer;
pub mod logical;
pub mod partition;

pub use bootloader::BootloaderOps;
pub use command::{CommandExecutor, CommandOutput, CommandSpec};
pub use filesystem::FilesystemOps;
pub use host::{HostOps, StopSignal, UdevBlacklist};
pub use image::ImageOps;
pub use installer::RootfsInstaller;
pub use logical::{LogicalOps, LvmDevicesConfig};
pub use partition::PartitionOps;
