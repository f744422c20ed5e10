//! Operation registry
//!
//! Maps each [`OperationKind`] to the command that carries it out. Resolution
//! is a pure function of its inputs: nothing is looked up on the system and
//! nothing is executed here.

use crate::config::CommandSettings;
use common::{BusLocation, DevicePath, DeviceSelector, Error, OperationKind, Result, ScanMode};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// What an operation is applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A USB device picked from the enumeration
    Device(DeviceSelector),
    /// A block device node given by the user
    Path(DevicePath),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Device(selector) => write!(f, "{}", selector),
            Target::Path(path) => write!(f, "{}", path),
        }
    }
}

impl From<DeviceSelector> for Target {
    fn from(selector: DeviceSelector) -> Self {
        Target::Device(selector)
    }
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(DevicePath::from(path))
    }
}

/// Operation-specific parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationParams {
    /// Filesystem type for `Format` (e.g. `vfat`, `ext4`)
    pub filesystem: Option<String>,
    /// Destination directory for `Backup`
    pub destination: Option<PathBuf>,
    /// Surface scan flavour for `ScanBadSectors`
    pub scan_mode: ScanMode,
}

impl OperationParams {
    pub fn with_filesystem(filesystem: impl Into<String>) -> Self {
        Self {
            filesystem: Some(filesystem.into()),
            ..Self::default()
        }
    }

    pub fn with_destination(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    pub fn with_scan_mode(scan_mode: ScanMode) -> Self {
        Self {
            scan_mode,
            ..Self::default()
        }
    }
}

/// External program invocation with an ordered argument list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutableCommand {
    pub program: String,
    pub arguments: Vec<String>,
}

impl ExecutableCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Name of the tool doing the work, skipping an elevation wrapper
    pub fn tool_name(&self, elevate: Option<&str>) -> &str {
        match (elevate, self.arguments.first()) {
            (Some(wrapper), Some(first)) if wrapper == self.program => first,
            _ => &self.program,
        }
    }
}

impl fmt::Display for ExecutableCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.arguments {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Outcome of resolving an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCommand {
    /// Platform USB reset call, no process involved
    UsbReset(DeviceSelector),
    /// External program to run to completion
    Process(ExecutableCommand),
}

impl fmt::Display for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedCommand::UsbReset(selector) => write!(f, "usb reset {}", selector),
            ResolvedCommand::Process(command) => write!(f, "{}", command),
        }
    }
}

/// Fixed mapping from operation kinds to command templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    commands: CommandSettings,
}

impl Registry {
    pub fn new(commands: CommandSettings) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &CommandSettings {
        &self.commands
    }

    /// Build the command for `kind` applied to `target`
    ///
    /// Fails with [`Error::InvalidParameter`] when a required parameter is
    /// missing or the target does not suit the operation.
    pub fn resolve(
        &self,
        kind: OperationKind,
        target: &Target,
        params: &OperationParams,
    ) -> Result<ResolvedCommand> {
        let resolved = match kind {
            OperationKind::Reset => ResolvedCommand::UsbReset(Self::reset_selector(target)?),
            OperationKind::CheckRepair => {
                let path = Self::device_path(kind, target)?;
                ResolvedCommand::Process(
                    self.elevated(&self.commands.fsck)
                        .arg("-y")
                        .arg(path.to_string()),
                )
            }
            OperationKind::Format => {
                let path = Self::device_path(kind, target)?;
                let filesystem = Self::filesystem(params)?;
                ResolvedCommand::Process(
                    self.elevated(&self.commands.mkfs)
                        .arg("-t")
                        .arg(filesystem)
                        .arg(path.to_string()),
                )
            }
            OperationKind::ScanBadSectors => {
                let path = Self::device_path(kind, target)?;
                let flags = match params.scan_mode {
                    ScanMode::ReadOnly => "-sv",
                    ScanMode::NonDestructive => "-nsv",
                    ScanMode::Destructive => "-wsv",
                };
                ResolvedCommand::Process(
                    self.elevated(&self.commands.badblocks)
                        .arg(flags)
                        .arg(path.to_string()),
                )
            }
            OperationKind::Backup => {
                let path = Self::device_path(kind, target)?;
                let destination = params
                    .destination
                    .as_ref()
                    .filter(|d| !d.as_os_str().is_empty())
                    .ok_or_else(|| {
                        Error::InvalidParameter("backup requires a destination path".to_string())
                    })?;
                ResolvedCommand::Process(
                    self.elevated(&self.commands.copy)
                        .arg("-a")
                        .arg(path.to_string())
                        .arg(destination.display().to_string()),
                )
            }
        };

        debug!("Resolved {} on {} to: {}", kind, target, resolved);
        Ok(resolved)
    }

    /// Start a command for `program`, behind the elevation wrapper if any
    fn elevated(&self, program: &str) -> ExecutableCommand {
        match self.commands.elevation() {
            Some(wrapper) => ExecutableCommand::new(wrapper).arg(program),
            None => ExecutableCommand::new(program),
        }
    }

    fn reset_selector(target: &Target) -> Result<DeviceSelector> {
        match target {
            Target::Device(selector) => Ok(*selector),
            Target::Path(path) => BusLocation::from_usbfs_path(path.as_path())
                .map(DeviceSelector::Location)
                .ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "reset needs a USB device, '{}' is not a usbfs node",
                        path
                    ))
                }),
        }
    }

    fn device_path(kind: OperationKind, target: &Target) -> Result<&DevicePath> {
        match target {
            Target::Path(path) if !path.is_empty() => Ok(path),
            Target::Path(_) => Err(Error::InvalidParameter(format!(
                "{} requires a device path",
                kind
            ))),
            Target::Device(selector) => Err(Error::InvalidParameter(format!(
                "{} works on a device path, not on USB device {}",
                kind, selector
            ))),
        }
    }

    fn filesystem(params: &OperationParams) -> Result<&str> {
        let filesystem = params
            .filesystem
            .as_deref()
            .map(str::trim)
            .filter(|fs| !fs.is_empty())
            .ok_or_else(|| {
                Error::InvalidParameter("format requires a filesystem type".to_string())
            })?;

        if filesystem.starts_with('-') || filesystem.contains(char::is_whitespace) {
            return Err(Error::InvalidParameter(format!(
                "invalid filesystem type '{}'",
                filesystem
            )));
        }

        Ok(filesystem)
    }
}
