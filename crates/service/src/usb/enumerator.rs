//! USB device enumerator
//!
//! Lists attached devices, applies the configured VID:PID filters and
//! resolves a [`DeviceSelector`] to exactly one attached unit.

use crate::usb::backend::UsbBackend;
use common::{AttachedDevice, DeviceDescriptor, DeviceIdentifier, DeviceSelector, Error, Result};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Linux Foundation vendor id, used by root hubs
const ROOT_HUB_VENDOR: u16 = 0x1d6b;
/// USB hub device class
const HUB_CLASS: u8 = 9;

/// VID:PID filter pattern
///
/// Written as `0xVID:0xPID`, either half may be `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    vendor_id: Option<u16>,
    product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, id: DeviceIdentifier) -> bool {
        self.vendor_id.is_none_or(|v| v == id.vendor_id)
            && self.product_id.is_none_or(|p| p == id.product_id)
    }

    fn parse_part(part: &str, name: &str, filter: &str) -> Result<Option<u16>> {
        if part == "*" {
            return Ok(None);
        }

        let hex = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Invalid {} '{}' in filter '{}', must start with '0x' (e.g., '0x1234')",
                    name, part, filter
                ))
            })?;

        if hex.is_empty() || hex.len() > 4 {
            return Err(Error::Config(format!(
                "Invalid {} '{}' in filter '{}', hex part must be 1-4 digits",
                name, part, filter
            )));
        }

        u16::from_str_radix(hex, 16).map(Some).map_err(|_| {
            Error::Config(format!(
                "Invalid {} '{}' in filter '{}', not a valid hex number",
                name, part, filter
            ))
        })
    }
}

impl FromStr for DeviceFilter {
    type Err = Error;

    fn from_str(filter: &str) -> Result<Self> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::Config(format!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            )));
        }

        Ok(Self {
            vendor_id: Self::parse_part(parts[0], "VID", filter)?,
            product_id: Self::parse_part(parts[1], "PID", filter)?,
        })
    }
}

/// Device enumerator over a [`UsbBackend`]
pub struct DeviceEnumerator<B> {
    backend: B,
    /// Allowed VID:PID patterns; empty allows everything
    filters: Vec<DeviceFilter>,
    /// Only report devices exposing a mass storage interface
    mass_storage_only: bool,
}

impl<B: UsbBackend> DeviceEnumerator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            filters: Vec::new(),
            mass_storage_only: false,
        }
    }

    /// Restrict enumeration to devices matching one of `filters`
    pub fn with_filters(mut self, filters: Vec<DeviceFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn mass_storage_only(mut self, enabled: bool) -> Self {
        self.mass_storage_only = enabled;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Identifiers of all attached devices
    ///
    /// Nothing attached is an empty list, not an error.
    pub fn list_devices(&self) -> Result<Vec<DeviceIdentifier>> {
        Ok(self
            .list_attached()?
            .into_iter()
            .map(|device| device.id)
            .collect())
    }

    /// Attached devices with their bus locations
    pub fn list_attached(&self) -> Result<Vec<AttachedDevice>> {
        let devices = self.backend.attached_devices().inspect_err(|e| {
            warn!("USB enumeration failed: {}", e);
        })?;

        let devices: Vec<AttachedDevice> = devices
            .into_iter()
            .filter(|device| self.is_listed(device))
            .collect();

        info!("{} USB devices found", devices.len());
        Ok(devices)
    }

    /// Resolve `selector` to the single attached unit it designates
    pub fn find(&self, selector: &DeviceSelector) -> Result<AttachedDevice> {
        let mut matches: Vec<AttachedDevice> = self
            .list_attached()?
            .into_iter()
            .filter(|device| selector.matches(device))
            .collect();

        match matches.len() {
            0 => {
                warn!("Device {} not found", selector);
                Err(Error::DeviceNotFound(selector.to_string()))
            }
            1 => Ok(matches.remove(0)),
            count => Err(Error::AmbiguousDevice {
                selector: selector.to_string(),
                count,
            }),
        }
    }

    /// String descriptors of the device designated by `selector`
    ///
    /// Fetched from the device on every call.
    pub fn describe_device(&self, selector: &DeviceSelector) -> Result<DeviceDescriptor> {
        let device = self.find(selector)?;
        let descriptor = self.backend.read_descriptor(&device)?;
        debug!("Descriptor of {}: {:?}", device.id, descriptor);
        Ok(descriptor)
    }

    fn is_listed(&self, device: &AttachedDevice) -> bool {
        if device.id.vendor_id == ROOT_HUB_VENDOR && device.class_code == HUB_CLASS {
            debug!("Skipping root hub at bus {}", device.location);
            return false;
        }

        if self.mass_storage_only && !device.mass_storage {
            return false;
        }

        if !self.filters.is_empty() && !self.filters.iter().any(|f| f.matches(device.id)) {
            debug!("Device {} ignored by filter", device.id);
            return false;
        }

        true
    }
}
