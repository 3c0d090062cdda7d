// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for node provisioning
//!
//! Implements the provisioning contracts on top of the host's tools:
//! - parted, sgdisk, mdadm and lvm2 for the storage layout
//! - mkfs, mount and blkid for filesystems
//! - grub for the bootloader
//! - direct file I/O and HTTP for image streaming
//! - procfs and signals for chroot teardown
//!
//! These operations require elevated privileges.

pub mod chroot;
pub mod error;
pub mod exec;
pub mod fs_tools;
pub mod grub_tools;
pub mod hardware;
pub mod host;
pub mod image;
pub mod installer;
pub mod logical;
pub mod parted_tools;
pub mod toolbox;
pub mod udev;

pub use error::{Result, SysError};
pub use exec::SystemExecutor;
pub use host::{HostSettings, HostTools};
pub use image::{HttpSettings, ImageTools};
pub use toolbox::{SystemSettings, system_toolbox};
