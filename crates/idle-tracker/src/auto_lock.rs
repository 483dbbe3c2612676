//! Auto-lock: lock a door some time after it was unlocked
//!
//! The lock is only engaged while the door's contact sensor reads closed.
//! If the door is still open when the timer fires, the timer is armed for
//! another full delay, for as long as it takes.

use crate::actuator::{Lock, StateReader};
use crate::error::TrackerError;
use crate::model::{values, Attribute, DeviceEvent, TrackerStatus};
use crate::timer::{TimerId, TimerService};
use crate::watch::{FireOutcome, Watch};
use std::time::Duration;

/// Single-device tracker gated on a contact sensor
pub struct AutoLockTracker<D> {
    devices: D,
    lock: String,
    contact_sensor: String,
    watch: Watch,
}

impl<D: Lock + StateReader> AutoLockTracker<D> {
    pub fn new(
        devices: D,
        lock: impl Into<String>,
        contact_sensor: impl Into<String>,
        delay: Duration,
    ) -> Result<Self, TrackerError> {
        if delay.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "auto-lock delay must be positive".to_string(),
            ));
        }
        Ok(Self {
            devices,
            lock: lock.into(),
            contact_sensor: contact_sensor.into(),
            watch: Watch::new(TimerId::AutoLock, delay),
        })
    }

    /// Handle a lock report: "locked" disarms, anything else (re)arms
    pub fn on_event(&mut self, event: &DeviceEvent, timers: &mut impl TimerService) {
        if event.attribute != Attribute::Lock || event.device_id != self.lock {
            return;
        }

        if event.is(values::LOCKED) {
            if self.watch.is_armed() {
                tracing::debug!("{} locked, auto-lock cancelled", self.lock);
            }
            self.watch.disarm(timers);
        } else {
            tracing::debug!("{} reported {}, auto-lock armed", self.lock, event.value);
            self.watch.arm(timers);
        }
    }

    /// Handle the auto-lock timer firing
    pub async fn on_timer(&mut self, timers: &mut impl TimerService) -> FireOutcome {
        if !self.watch.take_fire() {
            return FireOutcome::Ignored;
        }

        let closed = match self
            .devices
            .read_state(&self.contact_sensor, Attribute::Contact)
            .await
        {
            Ok(state) => state.as_deref() == Some(values::CLOSED),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.contact_sensor, e);
                false
            }
        };

        if !closed {
            tracing::debug!(
                "{} not closed, retrying auto-lock of {}",
                self.contact_sensor,
                self.lock
            );
            self.watch.arm(timers);
            return FireOutcome::Retrying;
        }

        match self.devices.lock(&self.lock).await {
            Ok(()) => {
                tracing::info!("Locked {}", self.lock);
                FireOutcome::Actuated
            }
            Err(e) => {
                tracing::warn!("Failed to lock {}, retrying: {}", self.lock, e);
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
        TrackerStatus::AutoLock {
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

    const DELAY: Duration = Duration::from_secs(10 * 60);

    fn tracker() -> (AutoLockTracker<FakeDevices>, FakeDevices) {
        let fake = FakeDevices::default();
        let tracker = AutoLockTracker::new(fake.clone(), "front", "front-contact", DELAY).unwrap();
        (tracker, fake)
    }

    fn lock_event(value: &str) -> DeviceEvent {
        DeviceEvent::new("front", Attribute::Lock, value)
    }

    #[tokio::test]
    async fn test_locks_when_door_closed() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();
        fake.set_state("front-contact", Attribute::Contact, values::CLOSED);

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        assert_eq!(timers.deadline(TimerId::AutoLock), Some(DELAY));

        timers.advance(DELAY);
        assert!(timers.fire(TimerId::AutoLock));
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Actuated);
        assert_eq!(fake.calls(), vec![Call::Lock("front".to_string())]);
        assert!(!tracker.is_armed());
        assert!(!timers.is_armed(TimerId::AutoLock));
    }

    #[tokio::test]
    async fn test_locked_before_fire_cancels() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        timers.advance(DELAY / 2);
        tracker.on_event(&lock_event(values::LOCKED), &mut timers);

        assert!(!tracker.is_armed());
        assert!(!timers.is_armed(TimerId::AutoLock));
        timers.advance(DELAY);
        assert!(!timers.fire(TimerId::AutoLock));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retries_while_door_open() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();
        fake.set_state("front-contact", Attribute::Contact, values::OPEN);

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        for round in 1..=5u32 {
            timers.advance(DELAY);
            assert!(timers.fire(TimerId::AutoLock));
            assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Retrying);
            assert_eq!(timers.deadline(TimerId::AutoLock), Some(DELAY * (round + 1)));
        }
        assert!(fake.calls().is_empty());
        // initial arm plus one re-arm per fire
        assert_eq!(timers.scheduled.len(), 6);
    }

    #[tokio::test]
    async fn test_unknown_sensor_state_counts_as_open() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        timers.advance(DELAY);
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Retrying);

        fake.set_failing("front-contact", true);
        timers.advance(DELAY);
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Retrying);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_lock_rearms() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();
        fake.set_state("front-contact", Attribute::Contact, values::CLOSED);
        fake.set_failing("front", true);

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        timers.advance(DELAY);
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Retrying);
        assert!(tracker.is_armed());

        fake.set_failing("front", false);
        timers.advance(DELAY);
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Actuated);
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_unlock_pushes_deadline() {
        let (mut tracker, _) = tracker();
        let mut timers = ManualTimers::new();

        tracker.on_event(&lock_event(values::UNLOCKED), &mut timers);
        timers.advance(DELAY / 2);
        tracker.on_event(&lock_event("unknown"), &mut timers);
        assert_eq!(timers.deadline(TimerId::AutoLock), Some(DELAY / 2 + DELAY));
    }

    #[tokio::test]
    async fn test_fire_while_idle_ignored() {
        let (mut tracker, fake) = tracker();
        let mut timers = ManualTimers::new();
        assert_eq!(tracker.on_timer(&mut timers).await, FireOutcome::Ignored);
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_rejects_zero_delay() {
        assert!(AutoLockTracker::new(FakeDevices::default(), "l", "s", Duration::ZERO).is_err());
    }
}
