use log::{debug, warn};
use serialport::{SerialPortInfo, SerialPortType};

use crate::engine::models::Port;

/// Enumerate serial ports reported by the OS. Never fails: an enumeration
/// error is logged and yields an empty list.
pub fn list() -> Vec<Port> {
    match serialport::available_ports() {
        Ok(ports) => {
            let ports: Vec<Port> = ports.into_iter().map(describe).collect();
            debug!("ports: found {}", ports.len());
            ports
        }
        Err(err) => {
            warn!("ports: enumeration failed ({err})");
            Vec::new()
        }
    }
}

fn describe(info: SerialPortInfo) -> Port {
    let description = match &info.port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .or_else(|| usb.manufacturer.clone())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| format!("USB {:04X}:{:04X}", usb.vid, usb.pid)),
        SerialPortType::PciPort => "PCI".to_owned(),
        SerialPortType::BluetoothPort => "Bluetooth".to_owned(),
        SerialPortType::Unknown => "n/a".to_owned(),
    };
    Port {
        device: info.port_name,
        description,
    }
}
