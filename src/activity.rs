//! Client activity bookkeeping for idle-mode sampling.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ActivityState,
    pub to: ActivityState,
}

#[derive(Debug)]
struct Inner {
    last_access: Instant,
    state: ActivityState,
}

/// Receives wake-ups sent when a request arrives while idle.
pub type WakeReceiver = mpsc::Receiver<()>;

#[derive(Debug)]
pub struct ActivityTracker {
    idle_timeout: Duration,
    inner: Mutex<Inner>,
    wake: mpsc::Sender<()>,
}

impl ActivityTracker {
    /// A zero `idle_timeout` disables idle mode.
    pub fn new(idle_timeout: Duration) -> (Self, WakeReceiver) {
        Self::new_at(idle_timeout, Instant::now())
    }

    pub fn new_at(idle_timeout: Duration, now: Instant) -> (Self, WakeReceiver) {
        // one slot: repeated accesses while idle coalesce into a single pending wake
        let (wake, rx) = mpsc::channel(1);
        let tracker = Self {
            idle_timeout,
            inner: Mutex::new(Inner {
                last_access: now,
                state: ActivityState::Active,
            }),
            wake,
        };
        (tracker, rx)
    }

    #[cfg(test)]
    pub fn state(&self) -> ActivityState {
        self.lock().state
    }

    /// Records a client access. Returns `true` if a wake signal was queued.
    pub fn record_access(&self) -> bool {
        self.record_access_at(Instant::now())
    }

    pub fn record_access_at(&self, now: Instant) -> bool {
        let was_idle = {
            let mut inner = self.lock();
            inner.last_access = now;
            inner.state == ActivityState::Idle
        };
        was_idle && self.wake.try_send(()).is_ok()
    }

    /// Recomputes the state from the last access time, reporting a change if any.
    pub fn evaluate(&self) -> Option<Transition> {
        self.evaluate_at(Instant::now())
    }

    pub fn evaluate_at(&self, now: Instant) -> Option<Transition> {
        let mut inner = self.lock();
        let elapsed = now.saturating_duration_since(inner.last_access);
        let next = if !self.idle_timeout.is_zero() && elapsed > self.idle_timeout {
            ActivityState::Idle
        } else {
            ActivityState::Active
        };

        let previous = inner.state;
        inner.state = next;
        (previous != next).then_some(Transition {
            from: previous,
            to: next,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
