//! USB backend abstraction
//!
//! This module wraps libusb (through `rusb`) behind a small trait covering
//! the calls the operation service needs.

use common::{AttachedDevice, BusLocation, DeviceDescriptor, DeviceIdentifier, Error, Result};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use tracing::{debug, warn};

/// USB mass storage interface class
const MASS_STORAGE_CLASS: u8 = 0x08;

/// Platform USB capability
///
/// Finding a device by identifier is done by the enumerator on top of
/// [`UsbBackend::attached_devices`].
pub trait UsbBackend: Send + Sync {
    /// Enumerate every currently attached device
    fn attached_devices(&self) -> Result<Vec<AttachedDevice>>;

    /// Read manufacturer, product and serial strings
    ///
    /// Strings the device does not provide come back empty.
    fn read_descriptor(&self, device: &AttachedDevice) -> Result<DeviceDescriptor>;

    /// Issue a USB port reset
    fn reset(&self, device: &AttachedDevice) -> Result<()>;
}

/// libusb-backed implementation
///
/// A context that cannot be created is remembered and reported as an
/// enumeration failure on first use, so path-only operations still work on
/// hosts without libusb access.
pub struct RusbBackend {
    context: std::result::Result<Context, rusb::Error>,
}

impl RusbBackend {
    pub fn new() -> Self {
        let context = Context::new();
        if let Err(e) = &context {
            warn!("libusb unavailable: {}", e);
        }
        Self { context }
    }

    fn context(&self) -> Result<&Context> {
        self.context
            .as_ref()
            .map_err(|e| Error::Enumeration(e.to_string()))
    }

    /// Look up the live rusb device sitting at `location`
    fn device_at(&self, location: BusLocation) -> Result<Device<Context>> {
        let devices = self
            .context()?
            .devices()
            .map_err(|e| Error::Enumeration(e.to_string()))?;

        devices
            .iter()
            .find(|d| d.bus_number() == location.bus && d.address() == location.address)
            .ok_or_else(|| Error::DeviceNotFound(format!("no device at bus {}", location)))
    }
}

impl Default for RusbBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for RusbBackend {
    fn attached_devices(&self) -> Result<Vec<AttachedDevice>> {
        let devices = self
            .context()?
            .devices()
            .map_err(|e| Error::Enumeration(e.to_string()))?;

        let mut attached = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        "Skipping device at bus={}, addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            attached.push(AttachedDevice {
                id: DeviceIdentifier::new(descriptor.vendor_id(), descriptor.product_id()),
                location: BusLocation::new(device.bus_number(), device.address()),
                class_code: descriptor.class_code(),
                mass_storage: has_mass_storage_interface(&device),
            });
        }

        debug!("Enumerated {} devices", attached.len());
        Ok(attached)
    }

    fn read_descriptor(&self, device: &AttachedDevice) -> Result<DeviceDescriptor> {
        let usb_device = self.device_at(device.location)?;
        let descriptor = usb_device
            .device_descriptor()
            .map_err(|e| Error::PlatformCall(e.to_string()))?;

        // Opening may be refused (permissions); strings then read as empty
        let handle = match usb_device.open() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot open {} to read strings: {}", device.id, e);
                return Ok(DeviceDescriptor::default());
            }
        };

        Ok(DeviceDescriptor {
            manufacturer: read_string(&handle, descriptor.manufacturer_string_index()),
            product: read_string(&handle, descriptor.product_string_index()),
            serial_number: read_string(&handle, descriptor.serial_number_string_index()),
        })
    }

    fn reset(&self, device: &AttachedDevice) -> Result<()> {
        let usb_device = self.device_at(device.location)?;

        let handle = usb_device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", device.id, e);
            map_rusb_error(e)
        })?;

        handle.reset().map_err(map_rusb_error)?;
        debug!("Reset device {} at bus {}", device.id, device.location);
        Ok(())
    }
}

/// Read one string descriptor, empty when absent or unreadable
fn read_string(handle: &DeviceHandle<Context>, index: Option<u8>) -> String {
    index
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
        .unwrap_or_default()
}

/// Check the active (or else first) configuration for a mass storage interface
fn has_mass_storage_interface(device: &Device<Context>) -> bool {
    let config = match device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))
    {
        Ok(config) => config,
        Err(e) => {
            debug!(
                "No configuration descriptor for bus={}, addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            return false;
        }
    };

    config.interfaces().any(|interface| {
        interface
            .descriptors()
            .any(|alt| alt.class_code() == MASS_STORAGE_CLASS)
    })
}

/// Map a libusb failure on an open/reset call to the error taxonomy
pub(crate) fn map_rusb_error(err: rusb::Error) -> Error {
    match err {
        rusb::Error::NoDevice | rusb::Error::NotFound => {
            Error::DeviceNotFound(format!("device disappeared: {}", err))
        }
        rusb::Error::Access => Error::PlatformCall(format!("permission denied: {}", err)),
        other => Error::PlatformCall(other.to_string()),
    }
}
