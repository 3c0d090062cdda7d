// SPDX-License-Identifier: GPL-3.0-only

//! Declarative disk spec translation
//!
//! Turns the orchestrator's node data into a [`PartitionScheme`] and an
//! [`ImageScheme`]. Nothing here touches the host: the live block device
//! inventory and the image metadata record are passed in.
//!
//! [`PartitionScheme`]: provision_types::PartitionScheme
//! [`ImageScheme`]: provision_types::ImageScheme

pub mod build_image;
pub mod disks;
pub mod driver;
pub mod input;
pub mod metadata;
pub mod nailgun;
pub mod simple;
pub mod system;

pub use build_image::BuildImage;
pub use driver::{Driver, DriverKind};
pub use input::{
    BuildImageData, ImageData, KsDisk, KsSpace, KsVg, KsVolume, ProvisionData, SimpleData,
    VolumeKind,
};
pub use metadata::{parse_image_metadata, render_image_metadata};
pub use nailgun::{LayoutOptions, Nailgun, metadata_uri};
