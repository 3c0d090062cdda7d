// SPDX-License-Identifier: GPL-3.0-only

//! Storage and image plan models for the provisioning agent
//!
//! This crate is the single source of truth for what a node should look like
//! once provisioned:
//!
//! - **provision-layout**: builds these types from a declarative disk spec
//! - **provision-agent**: drives the pipeline from them
//! - **provision-sys**: receives plain device names and options derived from them
//!
//! ## Ownership
//!
//! [`PartitionScheme`] owns every partition table, RAID array, LVM object and
//! filesystem of one node. Cross references are device-name strings or
//! [`LoopId`] handles into the scheme, so the whole plan is plain data that
//! serializes losslessly.

pub mod error;
pub mod filesystem;
pub mod hardware;
pub mod image;
pub mod lvm;
pub mod md;
pub mod os;
pub mod partition;
pub mod scheme;

pub use error::{Result, SchemeError};
pub use filesystem::{
    DEFAULT_FS_TYPE, DeviceRef, FileSystem, Loop, LoopId, SWAP_MOUNT, normalize_mount,
};
pub use hardware::BlockDevice;
pub use image::{
    Container, GROWABLE_FORMATS, Image, ImageMetadata, ImageRecord, ImageScheme,
    image_metadata_uri, uri_basename,
};
pub use lvm::{
    DEFAULT_PV_METADATA_COPIES, DEFAULT_PV_METADATA_SIZE, LogicalVolume, PhysicalVolume,
    VolumeGroup,
};
pub use md::{DEFAULT_MD_LEVEL, DEFAULT_MD_METADATA, Md};
pub use os::{
    ConfigDriveCommon, ConfigDriveScheme, DEFAULT_INITRD_REGEXP, DEFAULT_KERNEL_REGEXP, Grub,
    LegacyGrubRelease, OperatingSystem, OsRelease, Repo,
};
pub use partition::{Label, Parted, Partition, PartitionRequest, PartitionType};
pub use scheme::{MdRequest, PartitionScheme};
