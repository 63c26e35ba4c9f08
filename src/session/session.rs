use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::manager::SharedState;
use super::models::{ConnectionState, DeviceDescriptor, SessionConfig};
use super::{Result, SessionError};
use crate::serial::{PortIo, SerialError};

/// Upper bound on bytes returned by a single [`Session::receive`] call.
pub const READ_BUFFER_SIZE: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A live, exclusive connection to one device.
///
/// Operations take `&mut self`, so concurrent use of one session is ruled
/// out at the type level; the device reservation is released by
/// [`close`](Self::close), by detected disconnect, or on drop.
pub struct Session {
    descriptor: DeviceDescriptor,
    config: SessionConfig,
    port: Option<Box<dyn PortIo>>,
    read_timeout: Option<Duration>,
    shared: Arc<SharedState>,
}

impl Session {
    pub(crate) fn new(
        descriptor: DeviceDescriptor,
        config: SessionConfig,
        port: Box<dyn PortIo>,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            descriptor,
            config,
            port: Some(port),
            read_timeout: None,
            shared,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Opt-in read deadline for [`receive`](Self::receive). `None` (the
    /// default) makes receive non-blocking.
    pub fn set_read_timeout(&mut self, limit: Option<Duration>) {
        self.read_timeout = limit;
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Write all of `data` to the device, in order.
    ///
    /// Partial underlying writes are retried until the buffer is fully
    /// accepted. An empty buffer is a caller error and never touches the
    /// transport. On transport failure the error carries how many bytes
    /// were already written so the caller can decide about the remainder.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(SessionError::InvalidParameter(
                "send buffer is empty".to_string(),
            ));
        }

        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(SessionError::SessionClosed),
        };

        let mut written = 0;
        let mut failure: Option<io::Error> = None;

        while written < data.len() {
            match port.write(&data[written..]) {
                Ok(0) => {
                    failure = Some(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted zero bytes",
                    ));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = port.flush() {
                failure = Some(e);
            }
        }

        match failure {
            None => {
                log::debug!("Sent {} byte(s) to {}", written, self.descriptor.port_name);
                Ok(written)
            }
            Some(source) => {
                if is_disconnect(&source) {
                    self.mark_disconnected();
                }
                Err(SessionError::Io { written, source })
            }
        }
    }

    /// Return whatever bytes are currently available, up to
    /// [`READ_BUFFER_SIZE`].
    ///
    /// The transport has no message boundaries: each call yields zero or
    /// more bytes and callers must not assume framing. Without a read
    /// timeout the call returns immediately (an empty vec when nothing is
    /// pending). With one, it polls until bytes arrive or the deadline
    /// elapses with zero bytes, which is a [`SessionError::Timeout`].
    /// Stale data is never replayed; every byte is returned exactly once.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        match self.read_timeout {
            None => self.drain_available(),
            Some(limit) => {
                let poll = async {
                    loop {
                        let data = self.drain_available()?;
                        if !data.is_empty() {
                            return Ok(data);
                        }
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                };
                match timeout(limit, poll).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::Timeout),
                }
            }
        }
    }

    /// Release the device handle. Idempotent: closing an already-closed
    /// session is a no-op, and calling this from a failure-recovery path
    /// needs no prior state inspection.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            self.shared
                .release(self.descriptor.id, ConnectionState::Disconnected);
            log::info!("Closed session on {}", self.descriptor.port_name);
        }
    }

    fn drain_available(&mut self) -> Result<Vec<u8>> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(SessionError::SessionClosed),
        };

        let outcome: std::result::Result<Vec<u8>, io::Error> = (|| {
            let pending = port.bytes_to_read().map_err(serial_to_io)? as usize;
            if pending == 0 {
                return Ok(Vec::new());
            }

            let mut buf = vec![0u8; pending.min(READ_BUFFER_SIZE)];
            match port.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                // The pending bytes were consumed between the availability
                // check and the read; nothing to return this call.
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
                Err(e) => Err(e),
            }
        })();

        match outcome {
            Ok(data) => {
                if !data.is_empty() {
                    log::debug!(
                        "Received {} byte(s) from {}",
                        data.len(),
                        self.descriptor.port_name
                    );
                }
                Ok(data)
            }
            Err(source) => {
                if is_disconnect(&source) {
                    self.mark_disconnected();
                }
                Err(SessionError::Io { written: 0, source })
            }
        }
    }

    /// Abnormal termination: the device went away under us. Drop the
    /// handle and reservation so later calls fail fast with
    /// `SessionClosed` instead of hanging.
    fn mark_disconnected(&mut self) {
        if self.port.take().is_some() {
            log::warn!("Device {} disconnected mid-session", self.descriptor.port_name);
            self.shared.release(
                self.descriptor.id,
                ConnectionState::Error("device disconnected".to_string()),
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}

fn serial_to_io(err: SerialError) -> io::Error {
    match err {
        SerialError::Io(e) => e,
        SerialError::Serialport(e) => e.into(),
    }
}
