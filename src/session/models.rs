use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Result, SessionError};
use crate::serial::PortInfo;

/// Device connection state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Parity setting for a serial line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Conventional one-letter code, e.g. the N in "8N1".
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

/// Line parameters for one session.
///
/// All fields are checked by [`SessionConfig::validate`] before any hardware
/// call; an invalid combination never reaches the port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SessionConfig {
    pub fn new(baud_rate: u32, data_bits: u8, stop_bits: u8, parity: Parity) -> Self {
        Self {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SessionError::InvalidParameter(
                "baud rate must be positive".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(SessionError::InvalidParameter(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(SessionError::InvalidParameter(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    /// 9600 8N1
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

/// One discoverable USB serial device, valid as of the most recent
/// discovery snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: Uuid,
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub connection_state: ConnectionState,
    pub last_seen: DateTime<Utc>,
}

impl DeviceDescriptor {
    pub fn from_port_info(info: &PortInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            port_name: info.port_name.clone(),
            vid: info.vid,
            pid: info.pid,
            serial_number: info.serial_number.clone(),
            manufacturer: info.manufacturer.clone(),
            product: info.product.clone(),
            connection_state: ConnectionState::Disconnected,
            last_seen: Utc::now(),
        }
    }

    /// Human-readable name for device pickers.
    pub fn label(&self) -> String {
        match (&self.product, &self.manufacturer) {
            (Some(product), Some(manufacturer)) => {
                format!("{} {} ({})", manufacturer, product, self.port_name)
            }
            (Some(product), None) => format!("{} ({})", product, self.port_name),
            _ => self.port_name.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Connected)
    }

    pub fn update_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
        self.last_seen = Utc::now();
    }
}
