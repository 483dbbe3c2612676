//! Running automation instances
//!
//! Each instance is a tokio task that owns its tracker and timers. Device
//! events, timer fires and lifecycle commands all arrive through channels
//! and are handled one at a time, so tracker state needs no locking.

use crate::actuator::Devices;
use crate::auto_lock::AutoLockTracker;
use crate::door_close::DoorCloseTracker;
use crate::error::TrackerError;
use crate::lights::LightsOffTracker;
use crate::model::{AutomationSpec, DeviceEvent, Subscription, TrackerStatus};
use crate::timer::{TimerFired, TimerId, TimerService, TokioTimers};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// A tracker of any automation kind
pub enum Tracker<D> {
    LightsOff(LightsOffTracker<D>),
    AutoLock(AutoLockTracker<D>),
    DoorClose(DoorCloseTracker<D>),
}

impl<D: Devices> Tracker<D> {
    /// Build an idle tracker for `spec`
    pub fn from_spec(spec: &AutomationSpec, devices: D) -> Result<Self, TrackerError> {
        spec.validate()?;
        let tracker = match spec {
            AutomationSpec::LightsOff {
                devices: ids,
                sweep_minutes,
                ..
            } => Self::LightsOff(LightsOffTracker::new(
                devices,
                ids.iter().cloned(),
                spec.timeout(),
                Duration::from_secs(sweep_minutes * 60),
            )?),
            AutomationSpec::AutoLock {
                lock,
                contact_sensor,
                ..
            } => Self::AutoLock(AutoLockTracker::new(
                devices,
                lock.clone(),
                contact_sensor.clone(),
                spec.timeout(),
            )?),
            AutomationSpec::DoorClose { door, .. } => {
                Self::DoorClose(DoorCloseTracker::new(devices, door.clone(), spec.timeout())?)
            }
        };
        Ok(tracker)
    }

    /// Apply a new configuration.
    ///
    /// A lights-off tracker keeps the deadlines of devices that stay
    /// selected. Any other change cancels all timers and starts over idle.
    pub fn reconfigure(
        &mut self,
        spec: &AutomationSpec,
        devices: &D,
        timers: &mut impl TimerService,
    ) -> Result<(), TrackerError> {
        spec.validate()?;
        if let (
            Self::LightsOff(tracker),
            AutomationSpec::LightsOff {
                devices: ids,
                sweep_minutes,
                ..
            },
        ) = (&mut *self, spec)
        {
            return tracker.configure(
                ids.iter().cloned(),
                spec.timeout(),
                Duration::from_secs(sweep_minutes * 60),
                timers,
            );
        }

        let rebuilt = Self::from_spec(spec, devices.clone())?;
        self.reset(timers);
        *self = rebuilt;
        Ok(())
    }

    pub fn on_event(&mut self, event: &DeviceEvent, timers: &mut impl TimerService) {
        match self {
            Self::LightsOff(tracker) => tracker.on_event(event, timers),
            Self::AutoLock(tracker) => tracker.on_event(event, timers),
            Self::DoorClose(tracker) => tracker.on_event(event, timers),
        }
    }

    pub async fn on_timer(&mut self, id: TimerId, timers: &mut impl TimerService) {
        match (self, id) {
            (Self::LightsOff(tracker), TimerId::Sweep) => {
                tracker.sweep(timers).await;
            }
            (Self::AutoLock(tracker), TimerId::AutoLock) => {
                tracker.on_timer(timers).await;
            }
            (Self::DoorClose(tracker), TimerId::AutoClose) => {
                tracker.on_timer(timers).await;
            }
            (_, id) => tracing::debug!("Ignoring unrelated {:?} timer", id),
        }
    }

    /// Cancel every timer and forget all state
    pub fn reset(&mut self, timers: &mut impl TimerService) {
        match self {
            Self::LightsOff(tracker) => tracker.reset(timers),
            Self::AutoLock(tracker) => tracker.reset(timers),
            Self::DoorClose(tracker) => tracker.reset(timers),
        }
    }

    #[must_use]
    pub fn status(&self, timers: &impl TimerService) -> TrackerStatus {
        match self {
            Self::LightsOff(tracker) => tracker.status(timers),
            Self::AutoLock(tracker) => tracker.status(timers),
            Self::DoorClose(tracker) => tracker.status(timers),
        }
    }
}

enum Command {
    Update {
        spec: AutomationSpec,
        reply: oneshot::Sender<Result<(), TrackerError>>,
    },
    Status {
        reply: oneshot::Sender<TrackerStatus>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable sender side of an instance
#[derive(Clone)]
pub struct InstanceClient {
    id: String,
    tx: mpsc::Sender<Command>,
}

impl InstanceClient {
    /// Reconfigure the instance
    pub async fn update(&self, spec: AutomationSpec) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Update { spec, reply }).await?;
        rx.await
            .map_err(|_| TrackerError::InstanceStopped(self.id.clone()))?
    }

    /// Snapshot of the tracker state
    pub async fn status(&self) -> Result<TrackerStatus, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await
            .map_err(|_| TrackerError::InstanceStopped(self.id.clone()))
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| TrackerError::InstanceStopped(self.id.clone()))
    }
}

/// Handle to a running instance
pub struct InstanceHandle {
    client: InstanceClient,
    task: JoinHandle<()>,
}

impl InstanceHandle {
    /// Build the tracker for `spec` and start its task.
    ///
    /// `events` must already be subscribed so that no event published after
    /// this call is missed.
    pub fn spawn<D: Devices>(
        id: impl Into<String>,
        spec: &AutomationSpec,
        devices: D,
        events: broadcast::Receiver<DeviceEvent>,
    ) -> Result<Self, TrackerError> {
        let id = id.into();
        let tracker = Tracker::from_spec(spec, devices.clone())?;
        let (timers, fired_rx) = TokioTimers::channel();
        let (tx, commands) = mpsc::channel(16);

        let instance = Instance {
            id: id.clone(),
            tracker,
            devices,
            subscription: spec.subscription(),
            timers,
        };
        let task = tokio::spawn(instance.run(commands, fired_rx, events));

        tracing::info!("Started {} automation {}", spec.kind(), id);
        Ok(Self {
            client: InstanceClient { id, tx },
            task,
        })
    }

    #[must_use]
    pub fn client(&self) -> InstanceClient {
        self.client.clone()
    }

    /// Stop the instance, cancelling its timers and dropping its subscription
    pub async fn stop(self) {
        let (reply, rx) = oneshot::channel();
        if self.client.tx.send(Command::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

struct Instance<D> {
    id: String,
    tracker: Tracker<D>,
    devices: D,
    subscription: Subscription,
    timers: TokioTimers,
}

impl<D: Devices> Instance<D> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut fired_rx: mpsc::UnboundedReceiver<TimerFired>,
        mut events: broadcast::Receiver<DeviceEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Ok(event) => {
                        // events for other devices are dropped silently
                        if self.subscription.matches(&event) {
                            self.tracker.on_event(&event, &mut self.timers);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Automation {} lagged by {} events", self.id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event source closed, stopping automation {}", self.id);
                        break;
                    }
                },
                Some(fired) = fired_rx.recv() => {
                    if self.timers.accept(fired) {
                        self.tracker.on_timer(fired.id, &mut self.timers).await;
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Update { spec, reply }) => {
                        let _ = reply.send(self.update(&spec));
                    }
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(self.tracker.status(&self.timers));
                    }
                    Some(Command::Stop { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        return;
                    }
                    None => break,
                },
            }
        }
        self.stop();
    }

    fn update(&mut self, spec: &AutomationSpec) -> Result<(), TrackerError> {
        self.tracker
            .reconfigure(spec, &self.devices, &mut self.timers)?;
        self.subscription = spec.subscription();
        tracing::info!("Reconfigured automation {}", self.id);
        Ok(())
    }

    fn stop(&mut self) {
        self.tracker.reset(&mut self.timers);
        self.timers.cancel_all();
        tracing::info!("Stopped automation {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::{Call, FakeDevices};
    use crate::model::{values, Attribute};

    const MINUTE: Duration = Duration::from_secs(60);

    fn door_close(minutes: u64) -> AutomationSpec {
        AutomationSpec::DoorClose {
            door: "garage".to_string(),
            minutes,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_door_closed_once_after_delay() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let handle =
            InstanceHandle::spawn("door", &door_close(60), fake.clone(), event_tx.subscribe())
                .unwrap();

        event_tx
            .send(DeviceEvent::new("garage", Attribute::Door, values::OPEN))
            .unwrap();
        tokio::time::sleep(60 * MINUTE + Duration::from_secs(1)).await;
        assert_eq!(fake.calls(), vec![Call::CloseDoor("garage".to_string())]);

        tokio::time::sleep(180 * MINUTE).await;
        assert_eq!(fake.calls().len(), 1);
        assert_eq!(
            handle.client().status().await.unwrap(),
            TrackerStatus::DoorClose {
                armed: false,
                remaining_secs: None,
            }
        );
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lights_turned_off_by_sweep() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let spec = AutomationSpec::LightsOff {
            devices: vec!["hall".to_string()],
            hours: 1,
            sweep_minutes: 5,
        };
        let handle = InstanceHandle::spawn("lights", &spec, fake.clone(), event_tx.subscribe())
            .unwrap();

        event_tx
            .send(DeviceEvent::new("hall", Attribute::Switch, values::ON))
            .unwrap();
        tokio::time::sleep(59 * MINUTE).await;
        assert!(fake.calls().is_empty());

        // deadline is met by the first sweep at or after 60 minutes
        tokio::time::sleep(6 * MINUTE).await;
        assert_eq!(fake.calls(), vec![Call::TurnOff("hall".to_string())]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_neighbour_does_not_delay_sweep() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let spec = AutomationSpec::LightsOff {
            devices: vec!["a".to_string(), "b".to_string()],
            hours: 1,
            sweep_minutes: 5,
        };
        let handle = InstanceHandle::spawn("lights", &spec, fake.clone(), event_tx.subscribe())
            .unwrap();

        event_tx
            .send(DeviceEvent::new("a", Attribute::Switch, values::ON))
            .unwrap();
        // b reports more often than the sweep period for three hours
        for _ in 0..45 {
            tokio::time::sleep(4 * MINUTE).await;
            event_tx
                .send(DeviceEvent::new("b", Attribute::Switch, values::OFF))
                .unwrap();
        }

        assert_eq!(fake.calls(), vec![Call::TurnOff("a".to_string())]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timer() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let handle =
            InstanceHandle::spawn("door", &door_close(10), fake.clone(), event_tx.subscribe())
                .unwrap();

        event_tx
            .send(DeviceEvent::new("garage", Attribute::Door, values::OPEN))
            .unwrap();
        let client = handle.client();
        assert!(matches!(
            client.status().await.unwrap(),
            TrackerStatus::DoorClose { armed: true, .. }
        ));

        handle.stop().await;
        tokio::time::sleep(60 * MINUTE).await;
        assert!(fake.calls().is_empty());
        assert!(matches!(
            client.status().await,
            Err(TrackerError::InstanceStopped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_resets_and_resubscribes() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let handle =
            InstanceHandle::spawn("door", &door_close(10), fake.clone(), event_tx.subscribe())
                .unwrap();
        let client = handle.client();

        event_tx
            .send(DeviceEvent::new("garage", Attribute::Door, values::OPEN))
            .unwrap();
        client
            .update(AutomationSpec::DoorClose {
                door: "shed".to_string(),
                minutes: 5,
            })
            .await
            .unwrap();
        assert!(matches!(
            client.status().await.unwrap(),
            TrackerStatus::DoorClose { armed: false, .. }
        ));

        // the old door is no longer watched
        event_tx
            .send(DeviceEvent::new("garage", Attribute::Door, values::OPEN))
            .unwrap();
        event_tx
            .send(DeviceEvent::new("shed", Attribute::Door, values::OPEN))
            .unwrap();
        tokio::time::sleep(30 * MINUTE).await;
        assert_eq!(fake.calls(), vec![Call::CloseDoor("shed".to_string())]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_update_keeps_running_config() {
        let fake = FakeDevices::default();
        let (event_tx, _) = broadcast::channel(16);
        let handle =
            InstanceHandle::spawn("door", &door_close(10), fake.clone(), event_tx.subscribe())
                .unwrap();
        let client = handle.client();

        event_tx
            .send(DeviceEvent::new("garage", Attribute::Door, values::OPEN))
            .unwrap();
        assert!(client.update(door_close(0)).await.is_err());

        tokio::time::sleep(11 * MINUTE).await;
        assert_eq!(fake.calls(), vec![Call::CloseDoor("garage".to_string())]);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_spec() {
        let (event_tx, _) = broadcast::channel::<DeviceEvent>(4);
        let result = InstanceHandle::spawn(
            "bad",
            &door_close(0),
            FakeDevices::default(),
            event_tx.subscribe(),
        );
        assert!(matches!(result, Err(TrackerError::InvalidConfig(_))));
    }
}
