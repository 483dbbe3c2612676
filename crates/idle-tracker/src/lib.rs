//! Idle-timeout tracking for smart home devices
//!
//! Watches device state changes and acts once a device has been left in a
//! state for too long: switches left on are turned off, unlocked doors are
//! locked, open garage doors are closed.

pub mod actuator;
pub mod auto_lock;
pub mod door_close;
pub mod engine;
pub mod error;
pub mod instance;
pub mod lights;
pub mod model;
pub mod persistence;
pub mod timer;
mod watch;

pub use actuator::{Devices, DoorControl, Lock, StateReader, Switch};
pub use engine::IdleEngine;
pub use error::{ActuationError, TrackerError};
pub use model::*;
pub use watch::FireOutcome;
