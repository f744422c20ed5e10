//! USB subsystem
//!
//! Enumerates attached USB devices, reads their string descriptors and
//! issues port resets.
//!
//! The platform capability is expressed by the [`UsbBackend`] trait so the
//! enumerator and the dispatcher can be exercised without hardware. The real
//! implementation, [`RusbBackend`], talks to libusb through `rusb`.

pub mod backend;
pub mod enumerator;

pub use backend::{RusbBackend, UsbBackend};
pub use enumerator::{DeviceEnumerator, DeviceFilter};
