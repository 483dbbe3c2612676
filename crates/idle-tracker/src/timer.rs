//! One-shot timers for idle-timeout trackers

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Named timers an instance can arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Periodic deadline sweep (lights-off)
    Sweep,
    /// Lock attempt (auto-lock)
    AutoLock,
    /// Close attempt (door-close)
    AutoClose,
}

/// Clock and one-shot callback scheduling
pub trait TimerService {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Arm `id` to fire once after `delay`. Arming an armed id replaces it.
    fn schedule_once(&mut self, id: TimerId, delay: Duration);

    /// Disarm `id`. Cancelling an unarmed timer is a no-op.
    fn cancel(&mut self, id: TimerId);

    /// Whether `id` is currently armed
    fn is_armed(&self, id: TimerId) -> bool;

    /// Cancel any pending `id`, then arm it again
    fn rearm(&mut self, id: TimerId, delay: Duration) {
        self.cancel(id);
        self.schedule_once(id, delay);
    }
}

/// Notification sent by a timer task when its delay elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub id: TimerId,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Timer service backed by tokio sleep tasks
///
/// Each armed timer is a task that sleeps and then reports a [`TimerFired`]
/// on the channel given to [`TokioTimers::new`]. The owner must pass every
/// received notification through [`TokioTimers::accept`] before acting on it,
/// since a task may have sent its notification just before being cancelled.
pub struct TokioTimers {
    armed: HashMap<TimerId, ArmedTimer>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimers {
    /// Create a timer service reporting on `fired_tx`
    #[must_use]
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            armed: HashMap::new(),
            next_generation: 0,
            fired_tx,
        }
    }

    /// Create a timer service together with its notification channel
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Consume a fire notification.
    ///
    /// Returns `true` if it belongs to the currently armed timer, which is
    /// then disarmed. Stale notifications return `false`.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.id) {
            Some(armed) if armed.generation == fired.generation => {
                self.armed.remove(&fired.id);
                true
            }
            _ => {
                tracing::debug!("Ignoring stale {:?} timer fire", fired.id);
                false
            }
        }
    }

    /// Cancel every armed timer
    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }

    /// Number of armed timers
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

impl TimerService for TokioTimers {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule_once(&mut self, id: TimerId, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let fired_tx = self.fired_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(TimerFired { id, generation });
        });

        if let Some(previous) = self.armed.insert(id, ArmedTimer { generation, handle }) {
            previous.handle.abort();
        }
        tracing::debug!("Armed {:?} timer for {:?}", id, delay);
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(armed) = self.armed.remove(&id) {
            armed.handle.abort();
            tracing::debug!("Cancelled {:?} timer", id);
        }
    }

    fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Hand-driven timer service for tracker tests
#[cfg(test)]
pub(crate) mod testing {
    use super::{TimerId, TimerService};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::Instant;

    pub(crate) struct ManualTimers {
        start: Instant,
        elapsed: Duration,
        armed: HashMap<TimerId, Instant>,
        pub(crate) scheduled: Vec<(TimerId, Duration)>,
    }

    impl ManualTimers {
        pub(crate) fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Duration::ZERO,
                armed: HashMap::new(),
                scheduled: Vec::new(),
            }
        }

        pub(crate) fn advance(&mut self, by: Duration) {
            self.elapsed += by;
        }

        pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
            self.elapsed = elapsed;
        }

        /// Disarm `id` if its deadline has passed, mimicking a delivered fire
        pub(crate) fn fire(&mut self, id: TimerId) -> bool {
            match self.armed.get(&id) {
                Some(deadline) if *deadline <= self.now() => {
                    self.armed.remove(&id);
                    true
                }
                _ => false,
            }
        }

        pub(crate) fn deadline(&self, id: TimerId) -> Option<Duration> {
            self.armed.get(&id).map(|d| *d - self.start)
        }
    }

    impl TimerService for ManualTimers {
        fn now(&self) -> Instant {
            self.start + self.elapsed
        }

        fn schedule_once(&mut self, id: TimerId, delay: Duration) {
            self.scheduled.push((id, delay));
            self.armed.insert(id, self.now() + delay);
        }

        fn cancel(&mut self, id: TimerId) {
            self.armed.remove(&id);
        }

        fn is_armed(&self, id: TimerId) -> bool {
            self.armed.contains_key(&id)
        }
    }
}
