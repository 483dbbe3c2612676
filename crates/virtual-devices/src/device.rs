//! Virtual device representation

use idle_tracker::Attribute;
use serde::{Deserialize, Serialize};

/// What kind of device this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Outlet,
    Lock,
    ContactSensor,
    GarageDoor,
}

impl DeviceKind {
    /// Attribute this kind reports state changes on
    #[must_use]
    pub fn attribute(self) -> Attribute {
        match self {
            Self::Light | Self::Outlet => Attribute::Switch,
            Self::Lock => Attribute::Lock,
            Self::ContactSensor => Attribute::Contact,
            Self::GarageDoor => Attribute::Door,
        }
    }
}

/// A device held in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDevice {
    /// Unique identifier
    pub id: String,
    /// User-assigned friendly name
    #[serde(default)]
    pub name: Option<String>,
    pub kind: DeviceKind,
    /// Last reported value ("on", "locked", "closed", ...)
    #[serde(default)]
    pub state: Option<String>,
    /// Whether the device responds to commands
    #[serde(default = "default_available")]
    pub available: bool,
    /// Time of the last state change (ISO 8601)
    #[serde(default)]
    pub last_changed: Option<String>,
}

fn default_available() -> bool {
    true
}

impl VirtualDevice {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            state: None,
            available: true,
            last_changed: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Friendly name, or the id when none is set
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}
