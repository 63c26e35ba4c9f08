pub mod manager;
pub mod models;
pub mod session;

pub use manager::DeviceManager;
pub use models::*;
pub use session::Session;

use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Device enumeration failed: {0}")]
    Discovery(#[source] SerialError),

    #[error("Invalid session parameter: {0}")]
    InvalidParameter(String),

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Device is already in use by another session")]
    DeviceBusy,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Read timed out with no data available")]
    Timeout,

    #[error("IO error after {written} bytes: {source}")]
    Io {
        written: usize,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Wrap a transport error from a point where no payload bytes were
    /// involved yet.
    pub(crate) fn from_serial(err: SerialError) -> Self {
        match err {
            SerialError::Io(source) => SessionError::Io { written: 0, source },
            SerialError::Serialport(e) => SessionError::Io {
                written: 0,
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
