use std::time::{Duration, Instant};

/// Data-timeout watchdog for a connected stream
///
/// Expiry is measured from the last reset, so changing the window takes
/// effect immediately.
#[derive(Debug)]
pub struct Watchdog {
    window: Duration,
    last_reset: Option<Instant>,
}

impl Watchdog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_reset: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.last_reset = Some(now);
    }

    /// Renew on fresh evidence that the peer is alive
    pub fn reset_timeout_timer(&mut self, now: Instant) {
        self.arm(now);
    }

    pub fn disarm(&mut self) {
        self.last_reset = None;
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn is_armed(&self) -> bool {
        self.last_reset.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self.last_reset {
            Some(last) => now.saturating_duration_since(last) >= self.window,
            None => false,
        }
    }

    pub fn last_reset(&self) -> Option<Instant> {
        self.last_reset
    }
}
