//! Admission backpressure
//!
//! Bounds the memory held by pending writes. Admission stops once the pending
//! sector count passes the high watermark and resumes when it drops below the
//! low watermark. A stop never outlives its deadline, so a missed wake-up can
//! only stall writers for `timeout`.
//!
//! ```text
//!  pending
//!    ▲        stop ──┐
//!  hi┼──────────────●┼──────────
//!    │             / │\
//!  lo┼────────────/──┼─●──────── restart
//!    │           /   │
//!    └───────────────┴────────► time
//!                    deadline
//! ```

use std::time::{Duration, Instant};

/// Watermark state machine. Not thread-safe on its own; the pending index
/// keeps it under its lock together with the counter it watches.
#[derive(Debug, Clone)]
pub struct Backpressure {
    high: u64,
    low: u64,
    timeout: Duration,
    stopped: bool,
    deadline: Option<Instant>,
    stops: u64,
}

impl Backpressure {
    pub fn new(high: u64, low: u64, timeout: Duration) -> Self {
        assert!(low <= high, "low watermark {low} above high watermark {high}");
        Self {
            high,
            low,
            timeout,
            stopped: false,
            deadline: None,
            stops: 0,
        }
    }

    /// Stop admission if `pending` (after an insert) passed the high
    /// watermark. Returns true when this call stopped it.
    pub fn should_stop(&mut self, pending: u64, now: Instant) -> bool {
        if self.stopped || pending <= self.high {
            return false;
        }
        self.stopped = true;
        self.deadline = Some(now + self.timeout);
        self.stops += 1;
        tracing::debug!(pending, high = self.high, "admission stopped");
        true
    }

    /// Resume admission if `pending` (after a removal) fell below the low
    /// watermark or the deadline passed. Returns true when this call resumed
    /// it.
    ///
    /// An empty index cannot drain further, so zero pending also resumes.
    pub fn should_restart(&mut self, pending: u64, now: Instant) -> bool {
        if !self.stopped {
            return false;
        }
        let expired = self.deadline.is_some_and(|d| now >= d);
        if pending < self.low || pending == 0 || expired {
            self.stopped = false;
            self.deadline = None;
            tracing::debug!(pending, low = self.low, expired, "admission resumed");
            return true;
        }
        false
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of times admission has stopped
    pub fn stops(&self) -> u64 {
        self.stops
    }
}
