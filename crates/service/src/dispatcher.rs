//! Operation dispatcher
//!
//! Executes one maintenance operation per call and turns every outcome,
//! including errors, into an [`OperationResult`].
//!
//! A call runs on the caller's thread from start to finish:
//! Idle -> Executing -> Succeeded | Failed. There is no retry, no background
//! execution and no cancellation. Two calls aimed at the same device at the
//! same time are refused with `DeviceBusy` instead of running side by side.

use crate::registry::{ExecutableCommand, OperationParams, Registry, ResolvedCommand, Target};
use crate::runner::ProcessRunner;
use crate::usb::{DeviceEnumerator, UsbBackend};
use common::{DeviceSelector, Error, OperationKind, OperationResult, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};

/// Devices with an operation in flight
#[derive(Debug, Clone, Default)]
pub struct BusyTracker {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl BusyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` busy until the returned guard is dropped
    pub fn acquire(&self, key: String) -> Result<BusyGuard> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| Error::DeviceBusy(key.clone()))?;

        if !keys.insert(key.clone()) {
            return Err(Error::DeviceBusy(key));
        }

        Ok(BusyGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

/// Releases its device key on drop
#[derive(Debug)]
pub struct BusyGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

/// Runs operations against devices
pub struct Dispatcher<B, R> {
    registry: Registry,
    enumerator: DeviceEnumerator<B>,
    runner: R,
    busy: BusyTracker,
    timeout: Option<Duration>,
}

impl<B: UsbBackend, R: ProcessRunner> Dispatcher<B, R> {
    pub fn new(registry: Registry, enumerator: DeviceEnumerator<B>, runner: R) -> Self {
        Self {
            registry,
            enumerator,
            runner,
            busy: BusyTracker::new(),
            timeout: None,
        }
    }

    /// Kill external commands still running after `timeout`
    ///
    /// A zero duration means no timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn enumerator(&self) -> &DeviceEnumerator<B> {
        &self.enumerator
    }

    pub fn busy_tracker(&self) -> &BusyTracker {
        &self.busy
    }

    /// Run `kind` against `target` and report how it went
    ///
    /// Always returns exactly one result; errors never escape this call.
    pub fn execute(
        &self,
        kind: OperationKind,
        target: &Target,
        params: &OperationParams,
    ) -> OperationResult {
        debug!("Executing {} on {}", kind, target);

        match self.try_execute(kind, target, params) {
            Ok(message) => {
                info!("{} on {} succeeded", kind, target);
                OperationResult::success(kind, message)
            }
            Err(e) => {
                error!("{} on {} failed: {}", kind, target, e);
                OperationResult::failure(kind, &e)
            }
        }
    }

    fn try_execute(
        &self,
        kind: OperationKind,
        target: &Target,
        params: &OperationParams,
    ) -> Result<String> {
        match self.registry.resolve(kind, target, params)? {
            ResolvedCommand::UsbReset(selector) => self.reset(&selector),
            ResolvedCommand::Process(command) => {
                let _guard = self.busy.acquire(busy_key(target))?;
                self.run_process(kind, target, &command)
            }
        }
    }

    fn reset(&self, selector: &DeviceSelector) -> Result<String> {
        let device = self.enumerator.find(selector)?;
        let _guard = self.busy.acquire(device.location.usbfs_path().display().to_string())?;

        self.enumerator.backend().reset(&device)?;
        Ok(format!(
            "USB device {} at bus {} was reset",
            device.id, device.location
        ))
    }

    fn run_process(
        &self,
        kind: OperationKind,
        target: &Target,
        command: &ExecutableCommand,
    ) -> Result<String> {
        let elevation = self.registry.commands().elevation();
        let tool = command.tool_name(elevation).to_string();

        let output = self
            .runner
            .run(command, self.timeout)
            .map_err(|e| match e {
                Error::Timeout { timeout_secs, .. } => Error::Timeout {
                    program: tool.clone(),
                    timeout_secs,
                },
                other => other,
            })?;
        if !output.success() {
            return Err(Error::CommandExecution {
                program: tool,
                code: output.code,
                detail: output.diagnostic().to_string(),
            });
        }

        let mut message = format!("{} of {} completed", describe(kind), target);
        let detail = output.diagnostic();
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(last_line(detail));
        }
        Ok(message)
    }
}

/// Busy-tracker key for a target
///
/// Device nodes are keyed by their canonical path so that two spellings of
/// one node (`/dev/./sdb`, a `/dev/disk/by-id` link) share a key. Paths that
/// cannot be resolved fall back to their lexical normal form.
pub fn busy_key(target: &Target) -> String {
    match target {
        Target::Path(path) => std::fs::canonicalize(path.as_path())
            .unwrap_or_else(|_| normalize(path.as_path()))
            .display()
            .to_string(),
        Target::Device(selector) => selector.to_string(),
    }
}

/// Drop `.` and fold `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normal.pop() {
                    normal.push(component);
                }
            }
            other => normal.push(other),
        }
    }
    normal
}

fn describe(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Reset => "Reset",
        OperationKind::CheckRepair => "Check and repair",
        OperationKind::Format => "Format",
        OperationKind::ScanBadSectors => "Bad sector scan",
        OperationKind::Backup => "Backup",
    }
}

/// Tools like fsck end with a one-line summary
fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(text)
}
