use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use super::models::{ConnectionState, DeviceDescriptor, SessionConfig};
use super::session::Session;
use super::{Result, SessionError};
use crate::serial::{Backend, PortInfo, SerialError, SerialportBackend};

/// Registry shared between the manager and its live sessions.
///
/// Uses std sync locks rather than tokio ones so a session can release its
/// reservation from `Drop`. Critical sections are short and never held
/// across an await point.
pub(crate) struct SharedState {
    devices: RwLock<HashMap<Uuid, DeviceDescriptor>>,
    open_devices: Mutex<HashSet<Uuid>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            open_devices: Mutex::new(HashSet::new()),
        }
    }

    fn device(&self, device_id: &Uuid) -> Option<DeviceDescriptor> {
        read(&self.devices).get(device_id).cloned()
    }

    /// Claim exclusive access to a device. Exactly one of two racing
    /// claims for the same id wins.
    fn try_reserve(&self, device_id: Uuid) -> bool {
        lock(&self.open_devices).insert(device_id)
    }

    /// Drop a reservation and record the device's final state.
    pub(crate) fn release(&self, device_id: Uuid, state: ConnectionState) {
        lock(&self.open_devices).remove(&device_id);
        self.set_state(device_id, state);
    }

    pub(crate) fn set_state(&self, device_id: Uuid, state: ConnectionState) {
        if let Some(device) = write(&self.devices).get_mut(&device_id) {
            device.update_connection_state(state);
        }
    }

    /// Replace the descriptor snapshot, keeping ids (and state) for ports
    /// that are still attached.
    fn refresh(&self, ports: &[PortInfo]) -> Vec<DeviceDescriptor> {
        let mut devices = write(&self.devices);
        let mut next = HashMap::new();

        for port in ports {
            let existing = devices
                .values()
                .find(|d| d.port_name == port.port_name)
                .cloned();

            let descriptor = match existing {
                Some(mut known) => {
                    known.serial_number = port.serial_number.clone();
                    known.manufacturer = port.manufacturer.clone();
                    known.product = port.product.clone();
                    known.last_seen = chrono::Utc::now();
                    known
                }
                None => DeviceDescriptor::from_port_info(port),
            };
            next.insert(descriptor.id, descriptor);
        }

        *devices = next;

        let mut snapshot: Vec<DeviceDescriptor> = devices.values().cloned().collect();
        snapshot.sort_by(|a, b| a.port_name.cmp(&b.port_name));
        snapshot
    }
}

/// Central session management: snapshot discovery and exclusive opens.
pub struct DeviceManager {
    backend: Arc<dyn Backend>,
    shared: Arc<SharedState>,
}

impl DeviceManager {
    /// Manager over real hardware via the `serialport` crate.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(SerialportBackend))
    }

    /// Manager over an explicit backend (dependency injection seam; used
    /// with [`crate::LoopbackBackend`] in tests).
    pub fn with_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            shared: Arc::new(SharedState::new()),
        }
    }

    /// Enumerate currently attached USB serial devices.
    ///
    /// Eagerly materialized snapshot, sorted by port name; an empty vec
    /// means no devices, not an error. Ids stay stable across calls for
    /// devices that remain on the same port.
    pub async fn discover(&self) -> Result<Vec<DeviceDescriptor>> {
        let ports = self.backend.enumerate().map_err(SessionError::Discovery)?;
        let snapshot = self.shared.refresh(&ports);
        log::debug!("Discovered {} USB serial device(s)", snapshot.len());
        Ok(snapshot)
    }

    /// All descriptors from the most recent snapshot.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        let mut devices: Vec<DeviceDescriptor> = read(&self.shared.devices).values().cloned().collect();
        devices.sort_by(|a, b| a.port_name.cmp(&b.port_name));
        devices
    }

    /// A specific descriptor from the most recent snapshot.
    pub fn device(&self, device_id: &Uuid) -> Option<DeviceDescriptor> {
        self.shared.device(device_id)
    }

    /// Open an exclusive session on a discovered device.
    ///
    /// Parameter validation runs before any hardware call; on any failure
    /// the reservation is released and the device is left exactly as it
    /// was (all-or-nothing).
    pub async fn open(&self, device_id: &Uuid, config: SessionConfig) -> Result<Session> {
        config.validate()?;

        let mut descriptor = self
            .shared
            .device(device_id)
            .ok_or(SessionError::DeviceNotFound)?;

        if !self.shared.try_reserve(*device_id) {
            log::warn!("Open refused, {} is already in use", descriptor.port_name);
            return Err(SessionError::DeviceBusy);
        }

        let prior_state = descriptor.connection_state.clone();
        self.shared.set_state(*device_id, ConnectionState::Connecting);
        log::info!(
            "Opening {} at {} baud ({}{}{})",
            descriptor.port_name,
            config.baud_rate,
            config.data_bits,
            config.parity.letter(),
            config.stop_bits
        );

        match self.backend.open(&descriptor.port_name, &config) {
            Ok(port) => {
                self.shared.set_state(*device_id, ConnectionState::Connected);
                descriptor.update_connection_state(ConnectionState::Connected);
                log::info!("Session open on {}", descriptor.port_name);
                Ok(Session::new(descriptor, config, port, Arc::clone(&self.shared)))
            }
            Err(e) => {
                let error = map_open_error(e);
                // All-or-nothing: drop the reservation and put the
                // descriptor back the way the caller found it; the error
                // itself travels in the return value.
                self.shared.release(*device_id, prior_state);
                log::error!("Open failed on {}: {}", descriptor.port_name, error);
                Err(error)
            }
        }
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn map_open_error(err: SerialError) -> SessionError {
    match err {
        SerialError::Serialport(e) if e.kind() == serialport::ErrorKind::NoDevice => {
            SessionError::DeviceNotFound
        }
        other => SessionError::from_serial(other),
    }
}

// Descriptor and reservation data stay consistent even if a holder
// panicked; recover the guard instead of propagating the poison.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}
