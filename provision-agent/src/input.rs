// SPDX-License-Identifier: GPL-3.0-only

use provision_contracts::{Result, Toolbox};
use provision_layout::{
    BuildImage, BuildImageData, Driver, DriverKind, Nailgun, ProvisionData, SimpleData,
    metadata_uri, parse_image_metadata,
};
use provision_types::ImageMetadata;

use crate::config::AgentConfig;

/// Translate raw node input into a plan for the selected driver.
pub fn load_driver(
    kind: DriverKind,
    raw: &str,
    tools: &Toolbox,
    config: &AgentConfig,
) -> Result<Driver> {
    tracing::debug!("Loading input with {} driver", kind);
    let options = config.layout_options();

    let driver = match kind {
        DriverKind::Nailgun => {
            let data = ProvisionData::from_json(raw)?;
            let devices = tools.host.list_block_devices()?;
            tracing::debug!("{} block devices found", devices.len());
            let metadata = image_metadata(tools, metadata_uri(&data).as_deref());
            Driver::Nailgun(Nailgun::new(&data, &devices, &metadata, &options)?)
        }
        DriverKind::Simple => {
            let data = SimpleData::from_json(raw)?;
            let metadata = image_metadata(tools, metadata_uri(&data.node).as_deref());
            Driver::Simple(Nailgun::from_partitioning(&data, &metadata, &options)?)
        }
        DriverKind::BuildImage => {
            let data = BuildImageData::from_json(raw)?;
            Driver::BuildImage(BuildImage::new(&data)?)
        }
    };
    Ok(driver)
}

/// Fetch the metadata record published next to the root image. A missing
/// or unreadable record means images are written unverified.
pub fn image_metadata(tools: &Toolbox, uri: Option<&str>) -> ImageMetadata {
    let Some(uri) = uri else {
        tracing::debug!("No root image given, no image metadata to fetch");
        return ImageMetadata::default();
    };
    match tools.images.fetch_text(uri) {
        Ok(raw) => parse_image_metadata(&raw),
        Err(e) => {
            tracing::warn!("Can not fetch image metadata from {}: {}", uri, e);
            ImageMetadata::default()
        }
    }
}
