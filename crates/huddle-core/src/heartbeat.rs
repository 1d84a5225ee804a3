//! Keep-alive scheduling.
//!
//! The engine drops idle sockets, so an `Alive` envelope goes out on a fixed
//! interval while connected. The scheduler only tracks the deadline;
//! the session decides what to send when it fires.

use std::time::Duration;

/// Default interval between keep-alives.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    /// When the next keep-alive is due (ms); `None` while disarmed
    next_due: Option<u64>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the interval. Re-arming replaces the previous deadline.
    pub fn arm(&mut self, now_ms: u64) {
        self.next_due = Some(now_ms + self.interval_ms());
    }

    /// Stop the interval. Idempotent.
    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.next_due
    }

    /// Returns `true` if a keep-alive is due, and schedules the next one.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        match self.next_due {
            Some(due) if now_ms >= due => {
                self.next_due = Some(now_ms + self.interval_ms());
                true
            }
            _ => false,
        }
    }

    fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}
