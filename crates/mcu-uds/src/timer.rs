//! Clock and deadline timers used by the S3 keep-alive and the security lockout
//!
//! Timers do not own threads. The dispatcher ticks them from one background
//! task every `timer_poll_ms`; tests drive them directly with a [`ManualClock`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of monotonic time
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// One-shot deadline that can be re-armed and cancelled.
///
/// `poll` reports expiry exactly once and disarms the timer.
pub struct ScheduledTimer {
    clock: Arc<dyn Clock>,
    timeout: Duration,
    deadline: Mutex<Option<Instant>>,
}

impl ScheduledTimer {
    /// Create a disarmed timer
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            clock,
            timeout,
            deadline: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// (Re)start the countdown from now
    pub fn arm(&self) {
        *self.deadline.lock() = Some(self.clock.now() + self.timeout);
    }

    pub fn cancel(&self) {
        *self.deadline.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.lock().is_some()
    }

    /// Time left before expiry, `None` when disarmed
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = (*self.deadline.lock())?;
        Some(deadline.saturating_duration_since(self.clock.now()))
    }

    /// Returns `true` once when the deadline has passed, then disarms
    pub fn poll(&self) -> bool {
        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(at) if self.clock.now() >= at => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}
