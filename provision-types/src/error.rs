// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors raised while building or querying a partition scheme.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    #[error("incorrect mount point: {0}")]
    WrongFsMount(String),

    #[error("wrong partition scheme: {0}")]
    WrongPartitionScheme(String),

    #[error("disk not found: {0}")]
    DiskNotFound(String),

    #[error("md device names /dev/md0 to /dev/md127 are busy")]
    MdAlreadyExists,

    #[error("device {device} is already attached to {md}")]
    MdDeviceDuplication { md: String, device: String },

    #[error("loop device is already assigned to {0}")]
    LoopAlreadyAssigned(String),

    #[error("unknown loop placeholder #{0}")]
    UnknownLoop(usize),

    #[error("wrong input data: {0}")]
    WrongInputData(String),
}

impl SchemeError {
    pub fn wrong_scheme(message: impl Into<String>) -> Self {
        Self::WrongPartitionScheme(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SchemeError>;
