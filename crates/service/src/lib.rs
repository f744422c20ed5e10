//! Device operation service for usb-repair
//!
//! Lists attached USB devices and runs maintenance operations (reset,
//! filesystem check, format, bad-sector scan, backup) against a chosen
//! device. The actual work is delegated to libusb and to external tools.
//!
//! # Example
//!
//! ```
//! use common::OperationKind;
//! use service::test_utils::{FakeRunner, FakeUsbBackend};
//! use service::{DeviceEnumerator, Dispatcher, OperationParams, Registry};
//!
//! let runner = FakeRunner::exiting(0);
//! let dispatcher = Dispatcher::new(
//!     Registry::default(),
//!     DeviceEnumerator::new(FakeUsbBackend::new()),
//!     runner.clone(),
//! );
//!
//! let result = dispatcher.execute(
//!     OperationKind::CheckRepair,
//!     &"/dev/sdb1".into(),
//!     &OperationParams::default(),
//! );
//! assert!(result.succeeded());
//! assert_eq!(runner.commands()[0].to_string(), "sudo fsck -y /dev/sdb1");
//! ```

pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod reporter;
pub mod runner;
pub mod test_utils;
pub mod usb;

pub use config::ToolConfig;
pub use dispatcher::{BusyGuard, BusyTracker, Dispatcher};
pub use registry::{ExecutableCommand, OperationParams, Registry, ResolvedCommand, Target};
pub use reporter::{MemoryReporter, ResultReporter, TracingReporter};
pub use runner::{ProcessOutput, ProcessRunner, SystemRunner};
pub use usb::{DeviceEnumerator, DeviceFilter, RusbBackend, UsbBackend};
