//! Error types for the idle tracker

use thiserror::Error;

/// Errors raised while configuring or managing tracker instances
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Rejected configuration (empty device selection, zero duration, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Automation not found
    #[error("Automation not found: {0}")]
    NotFound(String),

    /// The instance task is no longer running
    #[error("Automation instance stopped: {0}")]
    InstanceStopped(String),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by actuators and state readers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuationError {
    /// No such device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device does not offer the requested capability
    #[error("Device {device} does not support {capability}")]
    Unsupported {
        device: String,
        capability: &'static str,
    },

    /// The device did not respond
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Any other device control failure
    #[error("Device control failed: {0}")]
    Failed(String),
}
