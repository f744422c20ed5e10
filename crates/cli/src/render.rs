//! Console output for devices and operation results

use crate::i18n::{Label, Locale, text};
use common::{AttachedDevice, DeviceDescriptor, OperationResult};
use serde::Serialize;
use service::ResultReporter;
use std::io::Write;

/// Device listing entry as printed with `--json`
#[derive(Debug, Serialize)]
pub struct DeviceEntry {
    #[serde(flatten)]
    pub device: AttachedDevice,
    pub descriptor: DeviceDescriptor,
}

/// Render the device list
pub fn device_list(locale: Locale, entries: &[DeviceEntry]) -> String {
    if entries.is_empty() {
        return format!("{}\n", text(locale, Label::NoDevices));
    }

    let mut out = format!("{} {}\n\n", entries.len(), text(locale, Label::DevicesFound));
    for entry in entries {
        out.push_str(&format!(
            "  [{}] {} - {} {}{}\n",
            entry.device.location,
            entry.device.id,
            or_label(locale, &entry.descriptor.manufacturer, Label::UnknownManufacturer),
            or_label(locale, &entry.descriptor.product, Label::UnknownProduct),
            if entry.device.mass_storage {
                format!(" ({})", text(locale, Label::MassStorage))
            } else {
                String::new()
            }
        ));
        if !entry.descriptor.serial_number.is_empty() {
            out.push_str(&format!(
                "      {}: {}\n",
                text(locale, Label::Serial),
                entry.descriptor.serial_number
            ));
        }
    }
    out
}

/// Render one device descriptor
pub fn descriptor(locale: Locale, descriptor: &DeviceDescriptor) -> String {
    format!(
        "{}: {}\n{}: {}\n{}: {}\n",
        text(locale, Label::Manufacturer),
        descriptor.manufacturer,
        text(locale, Label::Product),
        descriptor.product,
        text(locale, Label::Serial),
        descriptor.serial_number
    )
}

fn or_label<'a>(locale: Locale, value: &'a str, fallback: Label) -> &'a str {
    if value.is_empty() {
        text(locale, fallback)
    } else {
        value
    }
}

/// Render one operation result as a single line
pub fn result_line(locale: Locale, result: &OperationResult) -> String {
    let label = if result.succeeded() {
        Label::Success
    } else {
        Label::Failure
    };
    format!("{}: {}", text(locale, label), result.message())
}

/// Prints results to the terminal, as text or JSON
pub struct ConsoleReporter<W> {
    out: W,
    locale: Locale,
    json: bool,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, locale: Locale, json: bool) -> Self {
        Self { out, locale, json }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ResultReporter for ConsoleReporter<W> {
    fn report(&mut self, result: &OperationResult) {
        let line = if self.json {
            serde_json::to_string(result).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
        } else {
            result_line(self.locale, result)
        };

        if let Err(e) = writeln!(self.out, "{}", line) {
            tracing::warn!("Failed to print result: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BusLocation, DeviceIdentifier, Error, OperationKind};

    fn entry(serial: &str) -> DeviceEntry {
        DeviceEntry {
            device: AttachedDevice {
                id: DeviceIdentifier::new(0x0781, 0x5567),
                location: BusLocation::new(1, 4),
                class_code: 0,
                mass_storage: true,
            },
            descriptor: DeviceDescriptor {
                manufacturer: "SanDisk".to_string(),
                product: String::new(),
                serial_number: serial.to_string(),
            },
        }
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(device_list(Locale::Fr, &[]), "Aucun périphérique USB trouvé.\n");
    }

    #[test]
    fn test_list_uses_fallback_labels() {
        let out = device_list(Locale::En, &[entry("")]);
        assert!(out.starts_with("1 USB device(s) found:"));
        assert!(out.contains("[001/004] 0781:5567 - SanDisk Unknown Product (mass storage)"));
        assert!(!out.contains("Serial"));

        let out = device_list(Locale::En, &[entry("4C530001")]);
        assert!(out.contains("Serial: 4C530001"));
    }

    #[test]
    fn test_console_reporter_text() {
        let mut reporter = ConsoleReporter::new(Vec::new(), Locale::Fr, false);
        reporter.report(&OperationResult::success(OperationKind::Format, "Format of /dev/sdb1 completed"));
        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(out, "Succès: Format of /dev/sdb1 completed\n");
    }

    #[test]
    fn test_console_reporter_json() {
        let mut reporter = ConsoleReporter::new(Vec::new(), Locale::En, true);
        let err = Error::DeviceNotFound("0781:5567".to_string());
        reporter.report(&OperationResult::failure(OperationKind::Reset, &err));

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["succeeded"], false);
        assert_eq!(value["error"], "device_not_found");
    }

    #[test]
    fn test_entry_json_is_flat() {
        let value = serde_json::to_value(entry("X1")).unwrap();
        assert_eq!(value["id"]["vendor_id"], 0x0781);
        assert_eq!(value["descriptor"]["serial_number"], "X1");
    }
}
