//! Common error types

use crate::types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The USB subsystem could not be queried (permissions, missing driver)
    #[error("USB enumeration failed: {0}")]
    Enumeration(String),

    /// No currently attached device matches the selector
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A vendor/product pair matched several attached units
    #[error("{selector} matches {count} attached devices, select one by bus location")]
    AmbiguousDevice { selector: String, count: usize },

    /// A required operation parameter is missing or malformed
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// External process could not be launched or exited non-zero
    #[error("{program} failed (exit={code:?}): {detail}")]
    CommandExecution {
        program: String,
        code: Option<i32>,
        detail: String,
    },

    /// The platform USB call itself reported a fault
    #[error("USB platform call failed: {0}")]
    PlatformCall(String),

    #[error("{program} timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    /// Another operation is already running against the same device
    #[error("Device busy: {0} has an operation in progress")]
    DeviceBusy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Taxonomy tag carried into an `OperationResult`
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Enumeration(_) => ErrorKind::Enumeration,
            Error::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Error::AmbiguousDevice { .. } => ErrorKind::AmbiguousDevice,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Error::CommandExecution { .. } | Error::Io(_) => ErrorKind::CommandExecution,
            Error::PlatformCall(_) => ErrorKind::PlatformCall,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
