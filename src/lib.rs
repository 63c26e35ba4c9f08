//! USB serial device sessions: snapshot discovery, exclusive connect with
//! validated line parameters, ordered send, best-effort receive, and
//! idempotent teardown.

pub mod hex;
pub mod serial;
pub mod session;

pub use serial::loopback::LoopbackBackend;
pub use serial::{Backend, PortInfo};
pub use session::manager::DeviceManager;
pub use session::models::{ConnectionState, DeviceDescriptor, Parity, SessionConfig};
pub use session::session::{Session, READ_BUFFER_SIZE};
pub use session::{Result, SessionError};
