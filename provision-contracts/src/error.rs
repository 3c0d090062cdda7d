// SPDX-License-Identifier: GPL-3.0-only

use provision_types::SchemeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input; fails before anything destructive happens
    InvalidInput,
    /// The requested layout cannot be realized
    LayoutConsistency,
    /// External command or device race; retried at the call site
    TransientExecution,
    /// Written data does not match what was expected
    DataIntegrity,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        self == Self::TransientExecution
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Scheme(#[from] SchemeError),

    #[error("command `{command}` failed (exit code {exit_code:?}): {stderr}")]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("actual checksum {actual} mismatches with expected {expected} for {device}")]
    ImageChecksumMismatch {
        device: String,
        expected: String,
        actual: String,
    },

    #[error("partition {0} not found after creation")]
    PartitionNotFound(String),

    #[error("wrong target device: {0}")]
    WrongDevice(String),

    #[error("no free loop device for {0}")]
    NoFreeLoopDevices(String),

    #[error("filesystem utility failed: {0}")]
    FsUtils(String),

    #[error("request to {url} failed: {reason}")]
    HttpUrlConnection { url: String, reason: String },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("processes still running in {0}")]
    UnexpectedProcess(String),

    #[error("failed to write template {0}")]
    TemplateWrite(String),

    #[error("failed to encode or decode {what}: {reason}")]
    Serialization { what: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Scheme(error) => match error {
                SchemeError::WrongFsMount(_) | SchemeError::WrongInputData(_) => {
                    ErrorKind::InvalidInput
                }
                SchemeError::WrongPartitionScheme(_) | SchemeError::DiskNotFound(_) => {
                    ErrorKind::LayoutConsistency
                }
                SchemeError::MdAlreadyExists
                | SchemeError::MdDeviceDuplication { .. }
                | SchemeError::LoopAlreadyAssigned(_) => ErrorKind::Conflict,
                SchemeError::UnknownLoop(_) => ErrorKind::Internal,
            },
            Self::Execution { .. }
            | Self::PartitionNotFound(_)
            | Self::NoFreeLoopDevices(_)
            | Self::FsUtils(_)
            | Self::HttpUrlConnection { .. } => ErrorKind::TransientExecution,
            Self::ImageChecksumMismatch { .. } => ErrorKind::DataIntegrity,
            Self::WrongDevice(_) => ErrorKind::LayoutConsistency,
            Self::AlreadyExists(_) => ErrorKind::Conflict,
            Self::Serialization { .. } => ErrorKind::InvalidInput,
            Self::UnexpectedProcess(_) | Self::TemplateWrite(_) | Self::Io { .. } => {
                ErrorKind::Internal
            }
        }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn serialization(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Serialization {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let execution = ProvisionError::Execution {
            command: "parted".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "busy".to_string(),
        };
        assert!(execution.kind().is_retryable());

        let mismatch = ProvisionError::ImageChecksumMismatch {
            device: "/dev/sda3".to_string(),
            expected: "a".to_string(),
            actual: "b".to_string(),
        };
        assert_eq!(mismatch.kind(), ErrorKind::DataIntegrity);
        assert!(!mismatch.kind().is_retryable());

        let layout: ProvisionError = SchemeError::wrong_scheme("no /boot").into();
        assert_eq!(layout.kind(), ErrorKind::LayoutConsistency);
    }

    #[test]
    fn error_kind_roundtrips() {
        let json = serde_json::to_string(&ErrorKind::DataIntegrity).expect("serialize kind");
        assert_eq!(json, "\"data_integrity\"");
        let parsed: ErrorKind = serde_json::from_str(&json).expect("deserialize kind");
        assert_eq!(parsed, ErrorKind::DataIntegrity);
    }
}
