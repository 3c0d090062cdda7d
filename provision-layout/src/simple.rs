// SPDX-License-Identifier: GPL-3.0-only

//! Pre-resolved layouts
//!
//! The sender already computed the partition scheme; only the operating
//! system, bootloader, configdrive and image settings are derived here.

use provision_types::{ImageMetadata, PartitionScheme, Result};

use crate::input::SimpleData;
use crate::nailgun::{LayoutOptions, Nailgun};
use crate::system;

impl Nailgun {
    pub fn from_partitioning(
        data: &SimpleData,
        metadata: &ImageMetadata,
        options: &LayoutOptions,
    ) -> Result<Self> {
        let scheme = if data.partitioning.is_null() {
            PartitionScheme::new()
        } else {
            PartitionScheme::from_dict(data.partitioning.clone())?
        };
        tracing::debug!(
            "Using pre-resolved partition scheme: {} partition tables, {} file systems",
            scheme.parteds.len(),
            scheme.fss.len()
        );
        let os = system::operating_system(&data.node, metadata);
        Self::assemble(&data.node, metadata, options, os, scheme)
    }
}
