//! Minimum interval between a finished run and an accepted re-run request

use std::time::{Duration, Instant};

/// Gate that accepts at most one request per interval
///
/// The window restarts on every [`stamp`](Debounce::stamp) and every
/// accepted request.
#[derive(Debug, Clone)]
pub struct Debounce {
    interval: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Restart the window at `now`
    pub fn stamp(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Whether the window has elapsed at `now`
    pub fn has_elapsed(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Accept a request at `now` if the window has elapsed
    pub fn try_accept(&mut self, now: Instant) -> bool {
        if self.has_elapsed(now) {
            self.stamp(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
