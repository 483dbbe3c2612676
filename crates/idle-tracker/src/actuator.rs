//! Device capabilities the trackers act through
//!
//! Each automation kind depends only on the capabilities it needs, chosen
//! when the automation is configured: lights-off turns switches off,
//! auto-lock locks and reads a contact sensor, door-close closes a door.

use crate::error::ActuationError;
use crate::model::Attribute;
use std::future::Future;

/// Switches and lights
pub trait Switch: Send + Sync {
    fn turn_off(&self, device_id: &str) -> impl Future<Output = Result<(), ActuationError>> + Send;
}

/// Door locks
pub trait Lock: Send + Sync {
    fn lock(&self, device_id: &str) -> impl Future<Output = Result<(), ActuationError>> + Send;
}

/// Garage door controllers
pub trait DoorControl: Send + Sync {
    fn close_door(&self, device_id: &str)
        -> impl Future<Output = Result<(), ActuationError>> + Send;
}

/// Read access to the last reported device state
pub trait StateReader: Send + Sync {
    /// Current value of `attribute` on `device_id`, `None` if never reported
    fn read_state(
        &self,
        device_id: &str,
        attribute: Attribute,
    ) -> impl Future<Output = Result<Option<String>, ActuationError>> + Send;
}

/// Everything a hub must provide to run every automation kind
pub trait Devices: Switch + Lock + DoorControl + StateReader + Clone + 'static {}

impl<T> Devices for T where T: Switch + Lock + DoorControl + StateReader + Clone + 'static {}
