//! In-memory loopback backend: bytes written to a port come back on the
//! same port's read side. Used by the test suite in place of hardware and
//! usable by downstream consumers for the same purpose.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::backend::{Backend, PortIo};
use super::{PortInfo, Result, SerialError};
use crate::session::models::SessionConfig;

struct LoopbackDevice {
    info: PortInfo,
    buffer: Arc<Mutex<VecDeque<u8>>>,
    unplugged: Arc<AtomicBool>,
}

/// Backend that routes every write straight back to the writing port.
///
/// Devices are registered up front with [`add_device`](Self::add_device);
/// [`unplug`](Self::unplug) makes all subsequent I/O on a device fail the
/// way a removed cable does. Open and write counters let tests assert that
/// a rejected call never touched the transport.
pub struct LoopbackBackend {
    devices: Mutex<Vec<LoopbackDevice>>,
    write_chunk_limit: Mutex<Option<usize>>,
    last_config: Mutex<Option<SessionConfig>>,
    opens: AtomicUsize,
    writes: Arc<AtomicUsize>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            write_chunk_limit: Mutex::new(None),
            last_config: Mutex::new(None),
            opens: AtomicUsize::new(0),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_device(&self, port_name: &str, vid: u16, pid: u16, serial_number: Option<&str>) {
        let device = LoopbackDevice {
            info: PortInfo {
                port_name: port_name.to_string(),
                vid,
                pid,
                serial_number: serial_number.map(str::to_string),
                manufacturer: Some("Loopback".to_string()),
                product: Some("Virtual serial".to_string()),
            },
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            unplugged: Arc::new(AtomicBool::new(false)),
        };
        lock(&self.devices).push(device);
    }

    /// Cap how many bytes a single underlying write accepts, to exercise
    /// partial-write handling. Applies to ports opened after the call.
    pub fn set_write_chunk_limit(&self, limit: Option<usize>) {
        *lock(&self.write_chunk_limit) = limit;
    }

    /// Simulate cable removal: every later operation on the device's
    /// handles fails with `NotConnected`.
    pub fn unplug(&self, port_name: &str) {
        for device in lock(&self.devices).iter() {
            if device.info.port_name == port_name {
                device.unplugged.store(true, Ordering::SeqCst);
                log::debug!("Loopback device {} unplugged", port_name);
            }
        }
    }

    /// Number of open attempts that reached this backend.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of write calls that reached any loopback port.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Line parameters from the most recent successful open.
    pub fn last_config(&self) -> Option<SessionConfig> {
        *lock(&self.last_config)
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LoopbackBackend {
    fn enumerate(&self) -> Result<Vec<PortInfo>> {
        Ok(lock(&self.devices)
            .iter()
            .filter(|d| !d.unplugged.load(Ordering::SeqCst))
            .map(|d| d.info.clone())
            .collect())
    }

    fn open(&self, port_name: &str, config: &SessionConfig) -> Result<Box<dyn PortIo>> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let devices = lock(&self.devices);
        let device = devices
            .iter()
            .find(|d| d.info.port_name == port_name && !d.unplugged.load(Ordering::SeqCst))
            .ok_or_else(|| {
                SerialError::Serialport(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    format!("no loopback device on {port_name}"),
                ))
            })?;

        *lock(&self.last_config) = Some(*config);

        Ok(Box::new(LoopbackPort {
            buffer: Arc::clone(&device.buffer),
            unplugged: Arc::clone(&device.unplugged),
            write_chunk_limit: *lock(&self.write_chunk_limit),
            writes: Arc::clone(&self.writes),
        }))
    }
}

struct LoopbackPort {
    buffer: Arc<Mutex<VecDeque<u8>>>,
    unplugged: Arc<AtomicBool>,
    write_chunk_limit: Option<usize>,
    writes: Arc<AtomicUsize>,
}

impl LoopbackPort {
    fn check_plugged(&self) -> io::Result<()> {
        if self.unplugged.load(Ordering::SeqCst) {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "loopback device unplugged",
            ))
        } else {
            Ok(())
        }
    }
}

impl PortIo for LoopbackPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_plugged()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let accepted = match self.write_chunk_limit {
            Some(limit) => buf.len().min(limit),
            None => buf.len(),
        };
        lock(&self.buffer).extend(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_plugged()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_plugged()?;

        let mut buffer = lock(&self.buffer);
        let mut count = 0;
        while count < buf.len() {
            match buffer.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        self.check_plugged().map_err(SerialError::Io)?;
        Ok(lock(&self.buffer).len() as u32)
    }
}

// Loopback state is plain data; a poisoned lock just means another test
// thread panicked, so keep the data rather than cascading the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
