/// Serial port discovery and opening
use log::{debug, info};
use serialport::{SerialPort, SerialPortType};
use std::time::Duration;

use crate::errors::PortError;

const PROBE_BAUD_RATE: u32 = 9600;

/// Everything needed to open the controller's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub settle: Duration,
}

/// Finds a serial device when the operator did not pin one.
pub trait PortResolver {
    fn discover(&self) -> Result<String, PortError>;
}

/// Resolver backed by the operating system.
///
/// Asks the platform for its serial ports first and prefers USB adapters.
/// Only when enumeration comes back empty does it fall back to opening the
/// usual device paths one by one.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortResolver;

impl PortResolver for SystemPortResolver {
    fn discover(&self) -> Result<String, PortError> {
        match serialport::available_ports() {
            Ok(ports) if !ports.is_empty() => {
                let chosen = ports
                    .iter()
                    .find(|port| matches!(port.port_type, SerialPortType::UsbPort(_)))
                    .unwrap_or(&ports[0]);
                info!("Discovered serial port {}", chosen.port_name);
                return Ok(chosen.port_name.clone());
            }
            Ok(_) => debug!("Port enumeration returned nothing, probing known paths"),
            Err(e) => debug!("Port enumeration failed ({}), probing known paths", e),
        }

        probe_candidates()
            .into_iter()
            .find(|path| {
                serialport::new(path, PROBE_BAUD_RATE)
                    .open()
                    .map(drop)
                    .is_ok()
            })
            .map(|path| {
                info!("Probed serial port {}", path);
                path
            })
            .ok_or(PortError::NotFound)
    }
}

/// Device paths tried when enumeration is unavailable.
pub fn probe_candidates() -> Vec<String> {
    if cfg!(windows) {
        (0..256).map(|i| format!("COM{}", i)).collect()
    } else {
        (0..10)
            .map(|i| format!("/dev/ttyUSB{}", i))
            .chain((0..10).map(|i| format!("/dev/ttyACM{}", i)))
            .collect()
    }
}

pub fn open_port(
    path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, PortError> {
    // On Windows, COM ports >= 10 need the \\.\COMxx format
    #[cfg(target_os = "windows")]
    let path = &if path.starts_with("COM") {
        format!(r"\\.\{}", path)
    } else {
        path.to_string()
    };

    let port = serialport::new(path, baud_rate)
        .timeout(read_timeout)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|source| PortError::Open {
            path: path.to_string(),
            source,
        })?;

    info!("Connected to {} at {} baud", path, baud_rate);
    Ok(port)
}

/// Print the ports the platform reports, for `--list-ports`.
pub fn list_ports() {
    println!("Available serial ports:");
    match serialport::available_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                println!("  (none)");
            }
            for port in ports {
                match &port.port_type {
                    SerialPortType::UsbPort(info) => {
                        println!(
                            "  {} - USB (VID: 0x{:04x}, PID: 0x{:04x}) {}",
                            port.port_name,
                            info.vid,
                            info.pid,
                            info.product.as_deref().unwrap_or("")
                        );
                    }
                    SerialPortType::BluetoothPort => println!("  {} - Bluetooth", port.port_name),
                    SerialPortType::PciPort => println!("  {} - PCI", port.port_name),
                    SerialPortType::Unknown => println!("  {} - Unknown", port.port_name),
                }
            }
        }
        Err(e) => eprintln!("Error listing ports: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_candidates_cover_usb_and_acm_devices() {
        let candidates = probe_candidates();

        if cfg!(windows) {
            assert_eq!(candidates.len(), 256);
            assert_eq!(candidates[0], "COM0");
        } else {
            assert_eq!(candidates.len(), 20);
            assert_eq!(candidates[0], "/dev/ttyUSB0");
            assert_eq!(candidates[10], "/dev/ttyACM0");
            assert_eq!(candidates[19], "/dev/ttyACM9");
        }
    }
}
