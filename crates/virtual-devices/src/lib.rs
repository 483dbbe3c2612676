//! Virtual devices
//!
//! An in-memory device layer that feeds state changes to the idle engine
//! and carries out its commands.

pub mod device;
pub mod registry;

pub use device::{DeviceKind, VirtualDevice};
pub use registry::{DeviceError, VirtualDevices};
