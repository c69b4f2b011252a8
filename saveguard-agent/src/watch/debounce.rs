//! Pure change-acceptance rules shared by the detectors.

use std::time::{Duration, Instant, SystemTime};

/// Accepts a raw event only if it is at least `window` after the last accepted one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// Decide on a raw event observed at `at`. Rejected events do not move the baseline.
    pub fn accept(&mut self, at: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if at.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(at);
        true
    }

    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

/// Tracks the last known modification time of a polled file.
#[derive(Debug, Clone, Default)]
pub struct ModifiedBaseline {
    last: Option<SystemTime>,
}

impl ModifiedBaseline {
    pub fn new(initial: Option<SystemTime>) -> Self {
        Self { last: initial }
    }

    /// Record a fresh observation and report whether it counts as a change.
    ///
    /// A missing file (`None`) keeps the old baseline, so a file that briefly
    /// disappears during an atomic replace is not reported twice.
    pub fn observe(&mut self, current: Option<SystemTime>) -> bool {
        let Some(current) = current else {
            return false;
        };
        let changed = match self.last {
            Some(last) => current > last,
            None => true,
        };
        if changed {
            self.last = Some(current);
        }
        changed
    }

    /// Adopt `current` as the baseline without reporting anything.
    pub fn reset(&mut self, current: Option<SystemTime>) {
        if current.is_some() {
            self.last = current;
        }
    }

    pub fn last(&self) -> Option<SystemTime> {
        self.last
    }
}
