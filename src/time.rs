// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small timing helpers used by the batch executor's wall-clock and idle
//! guards.

use std::time::{Duration, Instant};

/// Tracks elapsed wall-clock time since the stopwatch was started.
///
/// Deliberately monotonic-clock-only: the executor only ever needs elapsed
/// durations to compare against guard thresholds, never a realtime timestamp
/// for display.
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    /// Starts a new stopwatch at the current instant.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns how long has elapsed since this stopwatch started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Tracks the time since the most recent "activity" tick, used by the idle
/// guard to detect a worker that has gone silent.
#[derive(Debug)]
pub struct IdleTracker {
    last_activity: Instant,
}

impl IdleTracker {
    /// Creates a tracker whose clock starts now.
    pub fn new() -> Self {
        Self {
            last_activity: Instant::now(),
        }
    }

    /// Records that activity (a line of output on either stream) was just
    /// observed.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Returns how long it has been since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn stopwatch_reports_nonzero_elapsed() {
        let sw = Stopwatch::start();
        sleep(Duration::from_millis(5));
        assert!(sw.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn idle_tracker_resets_on_touch() {
        let mut t = IdleTracker::new();
        sleep(Duration::from_millis(5));
        assert!(t.idle_for() >= Duration::from_millis(5));
        t.touch();
        assert!(t.idle_for() < Duration::from_millis(5));
    }
}
