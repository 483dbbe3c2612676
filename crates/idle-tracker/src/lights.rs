//! Lights-off: turn switches off once they have been on for too long
//!
//! Every switch reporting a value other than "off" gets a deadline of
//! `now + timeout`; repeated reports push the deadline out. A single sweep
//! timer scans the deadlines on a fixed period instead of one timer per
//! device, so a switch may stay on up to one sweep period past its deadline.
//! Reports never postpone a pending sweep, only the sweep itself reschedules.

use crate::actuator::Switch;
use crate::error::TrackerError;
use crate::model::{values, Attribute, DeviceEvent, TrackedDevice, TrackerStatus};
use crate::timer::{TimerId, TimerService};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Multi-device idle tracker
pub struct LightsOffTracker<S> {
    switch: S,
    devices: HashSet<String>,
    timeout: Duration,
    sweep_interval: Duration,
    /// Present iff the device is on and awaiting auto-off
    deadlines: HashMap<String, Instant>,
}

impl<S: Switch> LightsOffTracker<S> {
    pub fn new(
        switch: S,
        devices: impl IntoIterator<Item = String>,
        timeout: Duration,
        sweep_interval: Duration,
    ) -> Result<Self, TrackerError> {
        let devices: HashSet<String> = devices.into_iter().collect();
        validate(&devices, timeout, sweep_interval)?;
        Ok(Self {
            switch,
            devices,
            timeout,
            sweep_interval,
            deadlines: HashMap::new(),
        })
    }

    /// Replace the selected devices and timeout.
    ///
    /// Deadlines of devices that are no longer selected are dropped without
    /// turning anything off. Newly selected devices are only tracked once
    /// they report.
    pub fn configure(
        &mut self,
        devices: impl IntoIterator<Item = String>,
        timeout: Duration,
        sweep_interval: Duration,
        timers: &mut impl TimerService,
    ) -> Result<(), TrackerError> {
        let devices: HashSet<String> = devices.into_iter().collect();
        validate(&devices, timeout, sweep_interval)?;

        let before = self.deadlines.len();
        self.deadlines.retain(|device, _| devices.contains(device));
        let dropped = before - self.deadlines.len();
        if dropped > 0 {
            tracing::debug!("Dropped {} deselected devices from tracking", dropped);
        }

        self.devices = devices;
        self.timeout = timeout;
        self.sweep_interval = sweep_interval;
        self.rearm(timers);
        Ok(())
    }

    /// Handle a switch report
    pub fn on_event(&mut self, event: &DeviceEvent, timers: &mut impl TimerService) {
        if event.attribute != Attribute::Switch || !self.devices.contains(&event.device_id) {
            return;
        }

        if event.is(values::OFF) {
            if self.deadlines.remove(&event.device_id).is_some() {
                tracing::debug!("{} turned off, no longer tracked", event.device_id);
            }
        } else {
            let deadline = timers.now() + self.timeout;
            self.deadlines.insert(event.device_id.clone(), deadline);
            tracing::debug!(
                "{} reported {}, turning off in {:?}",
                event.device_id,
                event.value,
                self.timeout
            );
        }

        self.ensure_armed(timers);
    }

    /// Turn off every device whose deadline has passed.
    ///
    /// A device whose switch fails to respond stays tracked and is retried
    /// on the next sweep. Returns the number of devices turned off.
    pub async fn sweep(&mut self, timers: &mut impl TimerService) -> usize {
        let now = timers.now();
        let mut expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(device, _)| device.clone())
            .collect();
        expired.sort();

        let mut turned_off = 0;
        for device in expired {
            match self.switch.turn_off(&device).await {
                Ok(()) => {
                    tracing::info!("Turned off {} after {:?} idle", device, self.timeout);
                    self.deadlines.remove(&device);
                    turned_off += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to turn off {}, retrying next sweep: {}", device, e);
                }
            }
        }

        self.rearm(timers);
        turned_off
    }

    /// Cancel the sweep and forget every deadline
    pub fn reset(&mut self, timers: &mut impl TimerService) {
        self.deadlines.clear();
        timers.cancel(TimerId::Sweep);
    }

    /// Deadline of a tracked device
    #[must_use]
    pub fn deadline(&self, device_id: &str) -> Option<Instant> {
        self.deadlines.get(device_id).copied()
    }

    /// Number of devices awaiting auto-off
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.deadlines.len()
    }

    #[must_use]
    pub fn status(&self, timers: &impl TimerService) -> TrackerStatus {
        let now = timers.now();
        let mut tracked: Vec<TrackedDevice> = self
            .deadlines
            .iter()
            .map(|(device, deadline)| TrackedDevice {
                device_id: device.clone(),
                remaining_secs: deadline.saturating_duration_since(now).as_secs(),
            })
            .collect();
        tracked.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        TrackerStatus::LightsOff {
            tracked,
            sweep_armed: timers.is_armed(TimerId::Sweep),
        }
    }

    /// Arm a sweep if none is pending, or cancel it once nothing is tracked
    fn ensure_armed(&self, timers: &mut impl TimerService) {
        if self.deadlines.is_empty() {
            timers.cancel(TimerId::Sweep);
        } else if !timers.is_armed(TimerId::Sweep) {
            timers.schedule_once(TimerId::Sweep, self.sweep_interval);
        }
    }

    /// Schedule the next sweep, or none while nothing is tracked
    fn rearm(&self, timers: &mut impl TimerService) {
        timers.cancel(TimerId::Sweep);
        if !self.deadlines.is_empty() {
            timers.schedule_once(TimerId::Sweep, self.sweep_interval);
        }
    }
}

fn validate(
    devices: &HashSet<String>,
    timeout: Duration,
    sweep_interval: Duration,
) -> Result<(), TrackerError> {
    if devices.is_empty() {
        return Err(TrackerError::InvalidConfig(
            "no devices selected".to_string(),
        ));
    }
    if timeout.is_zero() || sweep_interval.is_zero() {
        return Err(TrackerError::InvalidConfig(
            "timeout and sweep interval must be positive".to_string(),
        ));
    }
    Ok(())
}
