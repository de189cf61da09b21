//! Serial port discovery.
//!
//! Host machines expose plenty of serial devices that are not the voice
//! peripheral (debug probes, modems, virtual ports). Discovery enumerates
//! everything, then tags ports whose USB identity matches the SoC or the
//! UART bridge chips the peripheral ships with, so a caller can present a
//! short list while still allowing an explicit path override.

use serialport::{SerialPortInfo, SerialPortType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Serial enumeration failed: {0}")]
    Enumeration(#[from] serialport::Error),
}

// Espressif's native USB interface plus the common bridge chips found on
// dev boards. A `None` PID matches any product from that vendor.
const KNOWN_USB_IDS: &[(u16, Option<u16>, &str)] = &[
    (0x303A, None, "espressif"),
    (0x10C4, Some(0xEA60), "cp210x"),
    (0x1A86, Some(0x7523), "ch340"),
    (0x0403, Some(0x6001), "ftdi"),
];

pub const TAG_USB: &str = "usb";
pub const TAG_LIKELY_PERIPHERAL: &str = "likely-peripheral";

/// Immutable snapshot of one candidate port, refreshed by rescanning.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDescriptor {
    /// Display name: the USB product string when the OS knows it, else the
    /// device path.
    pub name: String,
    /// OS device path handed to the open call.
    pub path: String,
    /// Classification tags: transport, bridge chip family, and
    /// `likely-peripheral` for recognized USB identities.
    pub tags: Vec<String>,
}

impl PortDescriptor {
    pub fn is_likely_peripheral(&self) -> bool {
        self.tags.iter().any(|t| t == TAG_LIKELY_PERIPHERAL)
    }
}

/// Enumerate every serial port on the host, classified.
pub fn scan_ports() -> Result<Vec<PortDescriptor>, DiscoveryError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(classify).collect())
}

/// Only the ports whose USB identity matches a known peripheral signature.
pub fn likely_peripherals() -> Result<Vec<PortDescriptor>, DiscoveryError> {
    Ok(scan_ports()?
        .into_iter()
        .filter(|p| p.is_likely_peripheral())
        .collect())
}

fn classify(info: SerialPortInfo) -> PortDescriptor {
    let mut tags = Vec::new();
    let mut name = info.port_name.clone();

    if let SerialPortType::UsbPort(usb) = &info.port_type {
        tags.push(TAG_USB.to_string());
        if let Some(product) = &usb.product {
            name = product.clone();
        }
        if let Some(family) = match_usb_id(usb.vid, usb.pid) {
            tags.push(family.to_string());
            tags.push(TAG_LIKELY_PERIPHERAL.to_string());
        }
    }

    PortDescriptor {
        name,
        path: info.port_name,
        tags,
    }
}

fn match_usb_id(vid: u16, pid: u16) -> Option<&'static str> {
    KNOWN_USB_IDS
        .iter()
        .find_map(|(known_vid, known_pid, family)| {
            (*known_vid == vid && known_pid.map_or(true, |p| p == pid)).then_some(*family)
        })
}
