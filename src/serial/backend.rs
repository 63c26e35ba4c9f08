use std::io;
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};

use super::{PortInfo, Result};
use crate::session::models::{Parity, SessionConfig};

/// Read/write timeout applied to the underlying port. Receives poll
/// `bytes_to_read` before reading, so this only bounds the syscall itself.
const PORT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Byte-level access to one opened port.
pub trait PortIo: Send {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn flush(&mut self) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn bytes_to_read(&mut self) -> Result<u32>;
}

/// Hardware seam: enumeration and port opening. The session layer only
/// talks to this trait, which is what lets a loopback stand in for real
/// hardware in tests.
pub trait Backend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<PortInfo>>;
    fn open(&self, port_name: &str, config: &SessionConfig) -> Result<Box<dyn PortIo>>;
}

/// Production backend over the `serialport` crate.
pub struct SerialportBackend;

impl Backend for SerialportBackend {
    fn enumerate(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        let mut infos = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                infos.push(PortInfo {
                    port_name: port.port_name.clone(),
                    vid: usb_info.vid,
                    pid: usb_info.pid,
                    serial_number: usb_info.serial_number.clone(),
                    manufacturer: usb_info.manufacturer.clone(),
                    product: usb_info.product.clone(),
                });
            }
        }

        Ok(infos)
    }

    fn open(&self, port_name: &str, config: &SessionConfig) -> Result<Box<dyn PortIo>> {
        let port = serialport::new(port_name, config.baud_rate)
            .data_bits(map_data_bits(config.data_bits)?)
            .stop_bits(map_stop_bits(config.stop_bits)?)
            .parity(map_parity(config.parity)?)
            .timeout(PORT_IO_TIMEOUT)
            .open()?;

        log::debug!(
            "Opened {} at {} baud ({}{}{})",
            port_name,
            config.baud_rate,
            config.data_bits,
            config.parity.letter(),
            config.stop_bits
        );

        Ok(Box::new(SerialportPort { port }))
    }
}

struct SerialportPort {
    port: Box<dyn SerialPort>,
}

impl PortIo for SerialportPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }
}

fn map_data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(unsupported(format!("data bits: {other}"))),
    }
}

fn map_stop_bits(bits: u8) -> Result<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(unsupported(format!("stop bits: {other}"))),
    }
}

fn map_parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        // The serialport crate has no mark/space parity; a platform that
        // needs them has to come in through a different Backend.
        Parity::Mark | Parity::Space => {
            Err(unsupported(format!("{parity:?} parity on this backend")))
        }
    }
}

fn unsupported(what: String) -> super::SerialError {
    super::SerialError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported {what}"),
    ))
}
