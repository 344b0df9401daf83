//! Shutdown control for the consumer loop.
//!
//! Two things stop a loop: a stop flag set from outside (signal adapter,
//! [`crate::WorkerHandle::shutdown`]) and running out of work. Both are only
//! consulted between leases, so an attempt that has started always finishes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Why a consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was set.
    Signal,
    /// Too many consecutive empty polls.
    Idle,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Signal => f.write_str("signal"),
            StopReason::Idle => f.write_str("idle"),
        }
    }
}

/// Cloneable stop flag shared between the process boundary and loops.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early if shutdown is requested.
    ///
    /// Returns `true` when woken by shutdown.
    pub async fn sleep_or_stop(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(duration) => self.is_triggered(),
        }
    }
}

/// Per-loop shutdown decision: stop flag plus idle-poll accounting.
pub struct ShutdownController {
    signal: ShutdownSignal,
    max_idle_polls: u32,
    idle_polls: u32,
}

impl ShutdownController {
    pub fn new(signal: ShutdownSignal, max_idle_polls: u32) -> Self {
        Self {
            signal,
            max_idle_polls: max_idle_polls.max(1),
            idle_polls: 0,
        }
    }

    /// Checked at the top of every iteration.
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.signal.is_triggered() {
            Some(StopReason::Signal)
        } else if self.idle_polls >= self.max_idle_polls {
            Some(StopReason::Idle)
        } else {
            None
        }
    }

    /// Count one "no job available" poll and return the running count.
    pub fn record_empty_poll(&mut self) -> u32 {
        self.idle_polls += 1;
        self.idle_polls
    }

    /// A job was leased; the idle streak is over.
    pub fn record_lease(&mut self) {
        self.idle_polls = 0;
    }

    pub fn idle_polls(&self) -> u32 {
        self.idle_polls
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }
}

/// Exponential backoff for an unreachable queue backend.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
