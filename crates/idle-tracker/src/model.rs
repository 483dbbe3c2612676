//! Data models for idle-timeout automations

use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// State values reported by devices
pub mod values {
    pub const ON: &str = "on";
    pub const OFF: &str = "off";
    pub const LOCKED: &str = "locked";
    pub const UNLOCKED: &str = "unlocked";
    pub const OPEN: &str = "open";
    pub const CLOSED: &str = "closed";
}

/// Default sweep period for lights-off automations, in minutes
pub const DEFAULT_SWEEP_MINUTES: u64 = 5;

/// Device attribute carried by a state-change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// On/off switch or light
    Switch,
    /// Door lock
    Lock,
    /// Contact sensor (open/closed)
    Contact,
    /// Garage door controller (open/closed)
    Door,
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Switch => "switch",
            Self::Lock => "lock",
            Self::Contact => "contact",
            Self::Door => "door",
        };
        f.write_str(name)
    }
}

/// A state-change notification for a single device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub attribute: Attribute,
    pub value: String,
}

impl DeviceEvent {
    pub fn new(
        device_id: impl Into<String>,
        attribute: Attribute,
        value: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            attribute,
            value: value.into(),
        }
    }

    /// Whether the reported value equals `value`
    #[must_use]
    pub fn is(&self, value: &str) -> bool {
        self.value == value
    }
}

/// The set of devices and the attribute an instance listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub attribute: Attribute,
    pub devices: HashSet<String>,
}

impl Subscription {
    #[must_use]
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        event.attribute == self.attribute && self.devices.contains(&event.device_id)
    }
}

/// What an automation watches and how long it waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationSpec {
    /// Turn switches off after they have been on for `hours`
    LightsOff {
        devices: Vec<String>,
        hours: u64,
        #[serde(default = "default_sweep_minutes")]
        sweep_minutes: u64,
    },
    /// Lock a door `minutes` after it was unlocked, once the contact sensor reads closed
    AutoLock {
        lock: String,
        contact_sensor: String,
        minutes: u64,
    },
    /// Close a garage door `minutes` after it was opened
    DoorClose { door: String, minutes: u64 },
}

fn default_sweep_minutes() -> u64 {
    DEFAULT_SWEEP_MINUTES
}

impl AutomationSpec {
    /// Reject degenerate configurations before any timer is armed
    pub fn validate(&self) -> Result<(), TrackerError> {
        match self {
            Self::LightsOff {
                devices,
                hours,
                sweep_minutes,
            } => {
                if devices.is_empty() {
                    return Err(TrackerError::InvalidConfig(
                        "lights_off needs at least one device".to_string(),
                    ));
                }
                for device in devices {
                    require_id("devices", device)?;
                }
                require_positive("hours", *hours, 3600)?;
                require_positive("sweep_minutes", *sweep_minutes, 60)?;
            }
            Self::AutoLock {
                lock,
                contact_sensor,
                minutes,
            } => {
                require_id("lock", lock)?;
                require_id("contact_sensor", contact_sensor)?;
                require_positive("minutes", *minutes, 60)?;
            }
            Self::DoorClose { door, minutes } => {
                require_id("door", door)?;
                require_positive("minutes", *minutes, 60)?;
            }
        }
        Ok(())
    }

    /// Idle timeout after the triggering event
    #[must_use]
    pub fn timeout(&self) -> Duration {
        match self {
            Self::LightsOff { hours, .. } => Duration::from_secs(hours.saturating_mul(3600)),
            Self::AutoLock { minutes, .. } | Self::DoorClose { minutes, .. } => {
                Duration::from_secs(minutes.saturating_mul(60))
            }
        }
    }

    /// Devices and attribute the automation reacts to
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        match self {
            Self::LightsOff { devices, .. } => Subscription {
                attribute: Attribute::Switch,
                devices: devices.iter().cloned().collect(),
            },
            Self::AutoLock { lock, .. } => Subscription {
                attribute: Attribute::Lock,
                devices: HashSet::from([lock.clone()]),
            },
            Self::DoorClose { door, .. } => Subscription {
                attribute: Attribute::Door,
                devices: HashSet::from([door.clone()]),
            },
        }
    }

    /// Short name of the automation kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LightsOff { .. } => "lights_off",
            Self::AutoLock { .. } => "auto_lock",
            Self::DoorClose { .. } => "door_close",
        }
    }
}

fn require_id(field: &str, id: &str) -> Result<(), TrackerError> {
    if id.trim().is_empty() {
        return Err(TrackerError::InvalidConfig(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

fn require_positive(field: &str, value: u64, unit_secs: u64) -> Result<(), TrackerError> {
    if value == 0 {
        return Err(TrackerError::InvalidConfig(format!(
            "{field} must be greater than zero"
        )));
    }
    if value.checked_mul(unit_secs).is_none() {
        return Err(TrackerError::InvalidConfig(format!("{field} is too large")));
    }
    Ok(())
}

/// A configured automation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Whether the automation is running
    pub enabled: bool,
    /// Devices, timeout and behaviour
    pub spec: AutomationSpec,
    /// Creation timestamp (ISO 8601)
    pub created_at: String,
    /// Last modification timestamp
    pub updated_at: String,
}

/// Request to create a new automation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAutomationRequest {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub spec: AutomationSpec,
}

fn default_enabled() -> bool {
    true
}

/// Request to update an automation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAutomationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub spec: Option<AutomationSpec>,
}

impl Automation {
    /// Create a new automation from a create request
    #[must_use]
    pub fn from_request(request: CreateAutomationRequest) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            enabled: request.enabled,
            spec: request.spec,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply an update request to this automation
    pub fn apply_update(&mut self, update: UpdateAutomationRequest) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(spec) = update.spec {
            self.spec = spec;
        }
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Remaining time for one tracked device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedDevice {
    pub device_id: String,
    pub remaining_secs: u64,
}

/// Snapshot of a running tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerStatus {
    LightsOff {
        tracked: Vec<TrackedDevice>,
        sweep_armed: bool,
    },
    AutoLock {
        armed: bool,
        remaining_secs: Option<u64>,
    },
    DoorClose {
        armed: bool,
        remaining_secs: Option<u64>,
    },
}
