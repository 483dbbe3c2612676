//! In-memory device registry
//!
//! Stands in for a hub's device layer: state reports come in through
//! [`VirtualDevices::report`], are stored and broadcast as [`DeviceEvent`]s.
//! Commands from automations change the stored state and are broadcast the
//! same way, as a real device would report its new state.

use crate::device::{DeviceKind, VirtualDevice};
use dashmap::DashMap;
use idle_tracker::{
    persistence, values, ActuationError, Attribute, DeviceEvent, DoorControl, Lock, StateReader,
    Switch,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Registry errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid device: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handle to the device registry
#[derive(Clone)]
pub struct VirtualDevices {
    /// Known devices (keyed by id)
    devices: Arc<DashMap<String, VirtualDevice>>,
    /// Event broadcaster
    event_tx: broadcast::Sender<DeviceEvent>,
    /// Path to device data file for persistence
    data_path: Option<PathBuf>,
}

impl Default for VirtualDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDevices {
    /// Create an empty in-memory registry
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            devices: Arc::new(DashMap::new()),
            event_tx,
            data_path: None,
        }
    }

    /// Create a registry seeded from `devices.json` in `data_dir`
    pub async fn load(data_dir: &Path) -> Self {
        let mut registry = Self::new();
        let path = data_dir.join("devices.json");
        for device in persistence::load_list::<VirtualDevice>(&path, "devices").await {
            registry.devices.insert(device.id.clone(), device);
        }
        registry.data_path = Some(path);
        registry
    }

    async fn save(&self) -> Result<(), DeviceError> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        persistence::save_list(path, &self.list()).await?;
        Ok(())
    }

    /// Sender side of the device event feed
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<DeviceEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to device events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// All devices, sorted by id
    #[must_use]
    pub fn list(&self) -> Vec<VirtualDevice> {
        let mut devices: Vec<VirtualDevice> =
            self.devices.iter().map(|r| r.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<VirtualDevice> {
        self.devices.get(id).map(|r| r.value().clone())
    }

    /// Register a new device
    pub async fn add(&self, device: VirtualDevice) -> Result<VirtualDevice, DeviceError> {
        if device.id.trim().is_empty() {
            return Err(DeviceError::Invalid("device id must not be empty".to_string()));
        }
        match self.devices.entry(device.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(DeviceError::AlreadyExists(device.id));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(device.clone());
            }
        }
        self.save().await?;
        tracing::info!("Added {:?} device {}", device.kind, device.display_name());
        Ok(device)
    }

    /// Remove a device
    pub async fn remove(&self, id: &str) -> Result<VirtualDevice, DeviceError> {
        let (_, device) = self
            .devices
            .remove(id)
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
        self.save().await?;
        tracing::info!("Removed device {}", device.display_name());
        Ok(device)
    }

    /// Record a state reported by a device and publish it
    pub fn report(&self, id: &str, value: &str) -> Result<DeviceEvent, DeviceError> {
        if value.trim().is_empty() {
            return Err(DeviceError::Invalid("state must not be empty".to_string()));
        }
        let kind = {
            let mut device = self
                .devices
                .get_mut(id)
                .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
            set_state(&mut device, value);
            device.kind
        };
        Ok(self.publish(id, kind.attribute(), value))
    }

    /// Mark a device as (un)responsive to commands
    pub fn set_available(&self, id: &str, available: bool) -> Result<(), DeviceError> {
        let mut device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
        device.available = available;
        tracing::debug!("{} available={}", device.display_name(), available);
        Ok(())
    }

    fn publish(&self, id: &str, attribute: Attribute, value: &str) -> DeviceEvent {
        let event = DeviceEvent::new(id, attribute, value);
        // no subscribers is fine
        let _ = self.event_tx.send(event.clone());
        event
    }

    /// Apply a command to a device of one of the `accepted` kinds
    fn actuate(
        &self,
        id: &str,
        accepted: &[DeviceKind],
        capability: &'static str,
        value: &str,
    ) -> Result<(), ActuationError> {
        let attribute = {
            let mut device = self
                .devices
                .get_mut(id)
                .ok_or_else(|| ActuationError::DeviceNotFound(id.to_string()))?;
            if !accepted.contains(&device.kind) {
                return Err(ActuationError::Unsupported {
                    device: id.to_string(),
                    capability,
                });
            }
            if !device.available {
                return Err(ActuationError::Unavailable(id.to_string()));
            }
            set_state(&mut device, value);
            device.kind.attribute()
        };
        tracing::debug!("{} -> {}", id, value);
        self.publish(id, attribute, value);
        Ok(())
    }
}

fn set_state(device: &mut VirtualDevice, value: &str) {
    device.state = Some(value.to_string());
    device.last_changed = Some(chrono::Utc::now().to_rfc3339());
}

impl Switch for VirtualDevices {
    async fn turn_off(&self, device_id: &str) -> Result<(), ActuationError> {
        self.actuate(
            device_id,
            &[DeviceKind::Light, DeviceKind::Outlet],
            "switch",
            values::OFF,
        )
    }
}

impl Lock for VirtualDevices {
    async fn lock(&self, device_id: &str) -> Result<(), ActuationError> {
        self.actuate(device_id, &[DeviceKind::Lock], "lock", values::LOCKED)
    }
}

impl DoorControl for VirtualDevices {
    async fn close_door(&self, device_id: &str) -> Result<(), ActuationError> {
        self.actuate(device_id, &[DeviceKind::GarageDoor], "door control", values::CLOSED)
    }
}

impl StateReader for VirtualDevices {
    async fn read_state(
        &self,
        device_id: &str,
        attribute: Attribute,
    ) -> Result<Option<String>, ActuationError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| ActuationError::DeviceNotFound(device_id.to_string()))?;
        if device.kind.attribute() != attribute {
            return Err(ActuationError::Unsupported {
                device: device_id.to_string(),
                capability: "state read",
            });
        }
        if !device.available {
            return Err(ActuationError::Unavailable(device_id.to_string()));
        }
        Ok(device.state.clone())
    }
}
