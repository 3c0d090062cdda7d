// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use provision_types::{ConfigDriveScheme, Grub, ImageScheme, OperatingSystem, PartitionScheme};
use serde::{Deserialize, Serialize};

use crate::build_image::BuildImage;
use crate::nailgun::Nailgun;

/// Input flavor, chosen by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Nailgun,
    Simple,
    BuildImage,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nailgun => f.write_str("nailgun"),
            Self::Simple => f.write_str("simple"),
            Self::BuildImage => f.write_str("build_image"),
        }
    }
}

/// Translated plan for one run.
#[derive(Debug, Clone)]
pub enum Driver {
    Nailgun(Nailgun),
    Simple(Nailgun),
    BuildImage(BuildImage),
}

impl Driver {
    pub fn kind(&self) -> DriverKind {
        match self {
            Self::Nailgun(_) => DriverKind::Nailgun,
            Self::Simple(_) => DriverKind::Simple,
            Self::BuildImage(_) => DriverKind::BuildImage,
        }
    }

    pub fn partition_scheme(&self) -> &PartitionScheme {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => &plan.partition_scheme,
            Self::BuildImage(plan) => &plan.partition_scheme,
        }
    }

    pub fn partition_scheme_mut(&mut self) -> &mut PartitionScheme {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => &mut plan.partition_scheme,
            Self::BuildImage(plan) => &mut plan.partition_scheme,
        }
    }

    pub fn image_scheme(&self) -> &ImageScheme {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => &plan.image_scheme,
            Self::BuildImage(plan) => &plan.image_scheme,
        }
    }

    pub fn image_scheme_mut(&mut self) -> &mut ImageScheme {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => &mut plan.image_scheme,
            Self::BuildImage(plan) => &mut plan.image_scheme,
        }
    }

    /// Both schemes at once, for stages that resolve images against devices.
    pub fn schemes_mut(&mut self) -> (&mut PartitionScheme, &mut ImageScheme) {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => {
                (&mut plan.partition_scheme, &mut plan.image_scheme)
            }
            Self::BuildImage(plan) => (&mut plan.partition_scheme, &mut plan.image_scheme),
        }
    }

    pub fn operating_system(&self) -> &OperatingSystem {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => &plan.os,
            Self::BuildImage(plan) => &plan.os,
        }
    }

    /// Image builds install no bootloader.
    pub fn grub(&self) -> Option<&Grub> {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => Some(&plan.grub),
            Self::BuildImage(_) => None,
        }
    }

    pub fn configdrive_scheme(&self) -> Option<&ConfigDriveScheme> {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => Some(&plan.configdrive_scheme),
            Self::BuildImage(_) => None,
        }
    }

    /// Location of the per-node metadata record: read before provisioning,
    /// written after an image build.
    pub fn bootstrap_metadata(&self) -> Option<&str> {
        match self {
            Self::Nailgun(plan) | Self::Simple(plan) => plan.metadata_uri.as_deref(),
            Self::BuildImage(plan) => Some(&plan.metadata_uri),
        }
    }

    pub fn build_output(&self) -> Option<&std::path::Path> {
        match self {
            Self::BuildImage(plan) => Some(plan.output()),
            _ => None,
        }
    }
}
