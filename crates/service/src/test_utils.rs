//! Test utilities for usb-repair
//!
//! Fake implementations of the USB backend and the process runner. Both
//! record every call so tests can assert what would have touched the system.
//!
//! # Example
//!
//! ```
//! use service::test_utils::{FakeRunner, FakeUsbBackend, mock_device};
//!
//! let backend = FakeUsbBackend::with_devices(vec![mock_device(1, 4, 0x0781, 0x5567)]);
//! let runner = FakeRunner::exiting(0);
//! assert_eq!(backend.reset_count(), 0);
//! assert!(runner.commands().is_empty());
//! ```

use crate::registry::ExecutableCommand;
use crate::runner::{ProcessOutput, ProcessRunner};
use crate::usb::UsbBackend;
use common::{
    AttachedDevice, BusLocation, DeviceDescriptor, DeviceIdentifier, Error, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Create a mass-storage [`AttachedDevice`] at `bus`/`address`
pub fn mock_device(bus: u8, address: u8, vendor_id: u16, product_id: u16) -> AttachedDevice {
    AttachedDevice {
        id: DeviceIdentifier::new(vendor_id, product_id),
        location: BusLocation::new(bus, address),
        class_code: 0x00,
        mass_storage: true,
    }
}

#[derive(Debug, Default)]
struct FakeUsbState {
    devices: Vec<AttachedDevice>,
    descriptors: HashMap<BusLocation, DeviceDescriptor>,
    enumeration_error: Option<String>,
    reset_error: Option<String>,
    resets: Vec<AttachedDevice>,
    descriptor_reads: usize,
}

/// In-memory USB backend
#[derive(Debug, Clone, Default)]
pub struct FakeUsbBackend {
    state: Arc<Mutex<FakeUsbState>>,
}

impl FakeUsbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<AttachedDevice>) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().devices = devices;
        backend
    }

    /// Backend whose enumeration always fails
    pub fn unavailable(reason: &str) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().enumeration_error = Some(reason.to_string());
        backend
    }

    /// Strings returned for the device at `location`
    pub fn set_descriptor(&self, location: BusLocation, descriptor: DeviceDescriptor) {
        self.state
            .lock()
            .unwrap()
            .descriptors
            .insert(location, descriptor);
    }

    /// Make every reset call fail with a platform error
    pub fn fail_resets(&self, reason: &str) {
        self.state.lock().unwrap().reset_error = Some(reason.to_string());
    }

    /// Devices a reset was issued to, in call order
    pub fn resets(&self) -> Vec<AttachedDevice> {
        self.state.lock().unwrap().resets.clone()
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().unwrap().resets.len()
    }

    pub fn descriptor_reads(&self) -> usize {
        self.state.lock().unwrap().descriptor_reads
    }
}

impl UsbBackend for FakeUsbBackend {
    fn attached_devices(&self) -> Result<Vec<AttachedDevice>> {
        let state = self.state.lock().unwrap();
        match &state.enumeration_error {
            Some(reason) => Err(Error::Enumeration(reason.clone())),
            None => Ok(state.devices.clone()),
        }
    }

    fn read_descriptor(&self, device: &AttachedDevice) -> Result<DeviceDescriptor> {
        let mut state = self.state.lock().unwrap();
        state.descriptor_reads += 1;
        Ok(state
            .descriptors
            .get(&device.location)
            .cloned()
            .unwrap_or_default())
    }

    fn reset(&self, device: &AttachedDevice) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.resets.push(device.clone());
        match &state.reset_error {
            Some(reason) => Err(Error::PlatformCall(reason.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct FakeRunnerState {
    commands: Vec<(ExecutableCommand, Option<Duration>)>,
}

#[derive(Debug, Clone)]
enum FakeOutcome {
    Exit(ProcessOutput),
    Timeout,
    LaunchFailure(String),
}

/// Process runner returning a scripted outcome without spawning anything
#[derive(Debug, Clone)]
pub struct FakeRunner {
    outcome: FakeOutcome,
    state: Arc<Mutex<FakeRunnerState>>,
}

impl FakeRunner {
    /// Every command exits with `code` and no output
    pub fn exiting(code: i32) -> Self {
        Self::with_output(ProcessOutput {
            code: Some(code),
            ..ProcessOutput::default()
        })
    }

    pub fn with_output(output: ProcessOutput) -> Self {
        Self {
            outcome: FakeOutcome::Exit(output),
            state: Arc::default(),
        }
    }

    /// Every command runs past its timeout
    pub fn timing_out() -> Self {
        Self {
            outcome: FakeOutcome::Timeout,
            state: Arc::default(),
        }
    }

    /// Every command fails to launch
    pub fn failing_to_launch(reason: &str) -> Self {
        Self {
            outcome: FakeOutcome::LaunchFailure(reason.to_string()),
            state: Arc::default(),
        }
    }

    /// Commands received, in call order
    pub fn commands(&self) -> Vec<ExecutableCommand> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Timeouts the commands were started with, in call order
    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|(_, timeout)| *timeout)
            .collect()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, command: &ExecutableCommand, timeout: Option<Duration>) -> Result<ProcessOutput> {
        self.state
            .lock()
            .unwrap()
            .commands
            .push((command.clone(), timeout));

        match &self.outcome {
            FakeOutcome::Exit(output) => Ok(output.clone()),
            FakeOutcome::Timeout => Err(Error::Timeout {
                program: command.program.clone(),
                timeout_secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
            FakeOutcome::LaunchFailure(reason) => Err(Error::CommandExecution {
                program: command.program.clone(),
                code: None,
                detail: reason.clone(),
            }),
        }
    }
}
