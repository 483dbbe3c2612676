//! Idle/armed state shared by the single-device trackers

use crate::timer::{TimerId, TimerService};
use std::time::Duration;
use tokio::time::Instant;

/// What happened when an armed timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The action was performed; the watch is idle again
    Actuated,
    /// The action was not performed; the timer was armed for another round
    Retrying,
    /// The watch was not armed
    Ignored,
}

/// One timer per watch: either idle or armed with a deadline
#[derive(Debug)]
pub(crate) struct Watch {
    timer: TimerId,
    delay: Duration,
    deadline: Option<Instant>,
}

impl Watch {
    pub(crate) fn new(timer: TimerId, delay: Duration) -> Self {
        Self {
            timer,
            delay,
            deadline: None,
        }
    }

    /// Cancel any pending timer and arm a fresh one
    pub(crate) fn arm(&mut self, timers: &mut impl TimerService) {
        timers.rearm(self.timer, self.delay);
        self.deadline = Some(timers.now() + self.delay);
    }

    /// Cancel the pending timer, if any
    pub(crate) fn disarm(&mut self, timers: &mut impl TimerService) {
        timers.cancel(self.timer);
        self.deadline = None;
    }

    /// Record that the timer fired. Returns `false` if the watch was idle.
    pub(crate) fn take_fire(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn remaining_secs(&self, now: Instant) -> Option<u64> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now).as_secs())
    }
}
