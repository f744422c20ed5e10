//! Common types for usb-repair
//!
//! This crate provides the data model shared between the device operation
//! service and the command-line front end: device identification, operation
//! kinds and results, the error taxonomy, and logging setup.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use types::{
    AttachedDevice, BusLocation, DeviceDescriptor, DeviceIdentifier, DevicePath, DeviceSelector,
    ErrorKind, OperationKind, OperationResult, ScanMode, USBFS_ROOT,
};
