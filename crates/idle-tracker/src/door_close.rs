//! Door-close: close a garage door left open

use crate::actuator::DoorControl;
use crate::error::TrackerError;
use crate::model::{values, Attribute, DeviceEvent, TrackerStatus};
use crate::timer::{TimerId, TimerService};
use crate::watch::{FireOutcome, Watch};
use std::time::Duration;

/// Single-device tracker without a secondary condition
pub struct DoorCloseTracker<D> {
    devices: D,
    door: String,
    watch: Watch,
}

impl<D: DoorControl> DoorCloseTracker<D> {
    pub fn new(devices: D, door: impl Into<String>, delay: Duration) -> Result<Self, TrackerError> {
        if delay.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "door-close delay must be positive".to_string(),
            ));
        }
        Ok(Self {
            devices,
            door: door.into(),
            watch: Watch::new(TimerId::AutoClose, delay),
        })
    }

    /// "open" arms the timer, "closed" cancels it, anything else is ignored
    pub fn on_event(&mut self, event: &DeviceEvent, timers: &mut impl TimerService) {
        if event.attribute != Attribute::Door || event.device_id != self.door {
            return;
        }

        if event.is(values::OPEN) {
            tracing::debug!("{} opened, auto-close armed", self.door);
            self.watch.arm(timers);
        } else if event.is(values::CLOSED) {
            self.watch.disarm(timers);
        }
    }

    /// Close the door. A failed close is retried after another full delay.
    pub async fn on_timer(&mut self, timers: &mut impl TimerService) -> FireOutcome {
        if !self.watch.take_fire() {
            return FireOutcome::Ignored;
        }

        match self.devices.close_door(&self.door).await {
            Ok(()) => {
                tracing::info!("Closed {}", self.door);
                FireOutcome::Actuated
            }
            Err(e) => {
                tracing::warn!("Failed to close {}, retrying: {}", self.door, e);
                self.watch.arm(timers);
                FireOutcome::Retrying
            }
        }
    }

    /// Cancel the pending timer and go idle
    pub fn reset(&mut self, timers: &mut impl TimerService) {
        self.watch.disarm(timers);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.watch.is_armed()
    }

    #[must_use]
    pub fn status(&self, timers: &impl TimerService) -> TrackerStatus {
        TrackerStatus::DoorClose {
            armed: self.watch.is_armed(),
            remaining_secs: self.watch.remaining_secs(timers.now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::{Call, FakeDevices};
    use crate::timer::testing::ManualTimers;

    const HOUR: Duration = Duration::from_secs(3600);

    fn door(value: &str) -> DeviceEvent {
        DeviceEvent::new("garage", Attribute::Door, value)
    }

    #[tokio::test]
    async fn test_closes_once_after_delay() {
        let fake = FakeDevices::default();
        let mut tracker = DoorCloseTracker::new(fake.clone(), "garage", HOUR).unwrap();
        let mut timers = ManualTimers::new();

        tracker.on_event(&door(values::OPEN), &mut timers);
        timers.advance(HOUR);
        assert!(timers.fire(TimerId::AutoClose));
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Actuated);

        assert_eq!(fake.calls(), vec![Call::CloseDoor("garage".to_string())]);
        assert!(!timers.is_armed(TimerId::AutoClose));
        assert_eq!(timers.scheduled.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_before_fire_cancels() {
        let fake = FakeDevices::default();
        let mut tracker = DoorCloseTracker::new(fake.clone(), "garage", HOUR).unwrap();
        let mut timers = ManualTimers::new();

        tracker.on_event(&door(values::OPEN), &mut timers);
        timers.advance(HOUR / 4);
        tracker.on_event(&door(values::CLOSED), &mut timers);

        assert!(!timers.is_armed(TimerId::AutoClose));
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Ignored);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_intermediate_values_ignored() {
        let mut tracker = DoorCloseTracker::new(FakeDevices::default(), "garage", HOUR).unwrap();
        let mut timers = ManualTimers::new();

        tracker.on_event(&door("opening"), &mut timers);
        assert!(!tracker.is_armed());

        tracker.on_event(&door(values::OPEN), &mut timers);
        tracker.on_event(&door("closing"), &mut timers);
        assert!(tracker.is_armed());
    }

    #[tokio::test]
    async fn test_failed_close_rearms() {
        let fake = FakeDevices::default();
        fake.set_failing("garage", true);
        let mut tracker = DoorCloseTracker::new(fake.clone(), "garage", HOUR).unwrap();
        let mut timers = ManualTimers::new();

        tracker.on_event(&door(values::OPEN), &mut timers);
        timers.advance(HOUR);
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Retrying);
        assert_eq!(timers.deadline(TimerId::AutoClose), Some(2 * HOUR));
    }
}
