//! Device and operation type definitions
//!
//! This module defines the data model shared by the operation service and the
//! presentation layer: how devices are identified and located, which
//! maintenance operations exist, and what an operation reports back.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Linux usbfs directory holding one node per attached device
pub const USBFS_ROOT: &str = "/dev/bus/usb";

/// USB vendor/product identifier
///
/// Identifies a device class rather than a physical unit: two identical
/// sticks plugged in at the same time share one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceIdentifier {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceIdentifier {
    type Err = Error;

    /// Parse `vvvv:pppp`, each half optionally prefixed with `0x`
    fn from_str(s: &str) -> Result<Self> {
        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::InvalidParameter(format!("expected VID:PID, got '{}'", s)))?;

        Ok(Self {
            vendor_id: parse_hex_id(vid, "vendor id")?,
            product_id: parse_hex_id(pid, "product id")?,
        })
    }
}

fn parse_hex_id(part: &str, name: &str) -> Result<u16> {
    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);

    if digits.is_empty() || digits.len() > 4 {
        return Err(Error::InvalidParameter(format!(
            "{} '{}' must be 1-4 hex digits",
            name, part
        )));
    }

    u16::from_str_radix(digits, 16)
        .map_err(|_| Error::InvalidParameter(format!("{} '{}' is not hexadecimal", name, part)))
}

/// Bus number and device address of one attached unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BusLocation {
    /// Bus number on the host
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
}

impl BusLocation {
    pub fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    /// Parse a usbfs node path such as `/dev/bus/usb/001/004`
    ///
    /// Returns `None` for anything that is not a node under [`USBFS_ROOT`].
    pub fn from_usbfs_path(path: &Path) -> Option<Self> {
        let rest = path.strip_prefix(USBFS_ROOT).ok()?;
        let mut parts = rest.iter();
        let bus = parts.next()?.to_str()?.parse().ok()?;
        let address = parts.next()?.to_str()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { bus, address })
    }

    /// usbfs node path of this unit
    pub fn usbfs_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}/{:03}/{:03}",
            USBFS_ROOT, self.bus, self.address
        ))
    }
}

impl fmt::Display for BusLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}/{:03}", self.bus, self.address)
    }
}

impl FromStr for BusLocation {
    type Err = Error;

    /// Parse `bus/address` in decimal, or a usbfs node path
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('/') {
            return Self::from_usbfs_path(Path::new(s))
                .ok_or_else(|| Error::InvalidParameter(format!("'{}' is not a usbfs node", s)));
        }

        let (bus, address) = s.split_once('/').ok_or_else(|| {
            Error::InvalidParameter(format!("expected BUS/ADDRESS, got '{}'", s))
        })?;
        let bus = bus
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid bus number '{}'", bus)))?;
        let address = address
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid device address '{}'", address)))?;

        Ok(Self { bus, address })
    }
}

/// How a caller designates a USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// Any attached unit with this vendor/product pair
    Id(DeviceIdentifier),
    /// Exactly the unit at this bus location
    Location(BusLocation),
}

impl DeviceSelector {
    /// Whether an attached device is designated by this selector
    pub fn matches(&self, device: &AttachedDevice) -> bool {
        match self {
            DeviceSelector::Id(id) => device.id == *id,
            DeviceSelector::Location(location) => device.location == *location,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Id(id) => write!(f, "{}", id),
            DeviceSelector::Location(location) => write!(f, "bus {}", location),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = Error;

    /// `vvvv:pppp` selects by identifier; `bus/address` or a usbfs path by location
    fn from_str(s: &str) -> Result<Self> {
        if s.contains('/') {
            BusLocation::from_str(s).map(DeviceSelector::Location)
        } else {
            DeviceIdentifier::from_str(s).map(DeviceSelector::Id)
        }
    }
}

impl From<DeviceIdentifier> for DeviceSelector {
    fn from(id: DeviceIdentifier) -> Self {
        DeviceSelector::Id(id)
    }
}

impl From<BusLocation> for DeviceSelector {
    fn from(location: BusLocation) -> Self {
        DeviceSelector::Location(location)
    }
}

/// One entry of the USB enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDevice {
    /// Vendor/product identifier
    pub id: DeviceIdentifier,
    /// Where the unit is attached
    pub location: BusLocation,
    /// Device class from the device descriptor
    pub class_code: u8,
    /// True when an interface of the configuration is mass storage (class 0x08)
    pub mass_storage: bool,
}

/// String descriptors of a device
///
/// Absent strings are empty rather than missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

/// OS path of a block device node, e.g. `/dev/sdb1`
///
/// Supplied by the user and not cross-checked against the USB enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<&str> for DevicePath {
    fn from(s: &str) -> Self {
        Self(PathBuf::from(s))
    }
}

impl From<PathBuf> for DevicePath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// Supported maintenance operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// USB port reset of a device
    Reset,
    /// Filesystem check with automatic repair
    CheckRepair,
    /// Create a new filesystem
    Format,
    /// Surface scan for bad blocks
    ScanBadSectors,
    /// Archive-preserving recursive copy
    Backup,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Reset,
        OperationKind::CheckRepair,
        OperationKind::Format,
        OperationKind::ScanBadSectors,
        OperationKind::Backup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Reset => "reset",
            OperationKind::CheckRepair => "check-repair",
            OperationKind::Format => "format",
            OperationKind::ScanBadSectors => "scan-bad-sectors",
            OperationKind::Backup => "backup",
        }
    }

    /// Whether running the operation with `scan_mode` can destroy data
    pub fn is_destructive(&self, scan_mode: ScanMode) -> bool {
        match self {
            OperationKind::Format => true,
            OperationKind::ScanBadSectors => scan_mode != ScanMode::ReadOnly,
            _ => false,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown operation '{}'", s)))
    }
}

/// Bad-sector scan flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Read every block, write nothing
    #[default]
    ReadOnly,
    /// Read, write back and verify each block, preserving contents
    NonDestructive,
    /// Write test patterns over the whole device
    Destructive,
}

/// Error classification carried by a failed [`OperationResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Enumeration,
    DeviceNotFound,
    AmbiguousDevice,
    InvalidParameter,
    CommandExecution,
    PlatformCall,
    Timeout,
    DeviceBusy,
    Config,
}

/// Outcome of one dispatched operation
///
/// Built once per call and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    kind: OperationKind,
    succeeded: bool,
    message: String,
    error: Option<ErrorKind>,
}

impl OperationResult {
    pub fn success(kind: OperationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            succeeded: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(kind: OperationKind, error: &Error) -> Self {
        Self {
            kind,
            succeeded: false,
            message: error.to_string(),
            error: Some(error.kind()),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }
}
