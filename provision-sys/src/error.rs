// SPDX-License-Identifier: GPL-3.0-only

use provision_contracts::ProvisionError;
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },
}

impl SysError {
    /// Classify an error from opening `path`.
    pub fn from_open(path: &str, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            std::io::ErrorKind::NotFound => Self::DeviceNotFound(path.to_string()),
            _ => Self::Io(error),
        }
    }
}

impl From<SysError> for ProvisionError {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Io(source) => ProvisionError::io("<system>", source),
            SysError::PermissionDenied(path) => ProvisionError::io(
                &path,
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ),
            SysError::DeviceNotFound(device) => ProvisionError::WrongDevice(device),
            SysError::OperationFailed(message) => ProvisionError::Execution {
                command: message,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            },
            SysError::Http { url, reason } => ProvisionError::HttpUrlConnection { url, reason },
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
