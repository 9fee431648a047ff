//! Sliding-window request log.

use std::collections::VecDeque;
use std::time::Duration;

/// Timestamps of admitted requests within a trailing window.
///
/// Unlike a fixed-window counter, the window moves continuously: a request
/// stops counting exactly `window` after it was recorded.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// Admission timestamps in epoch ms, oldest first
    timestamps: VecDeque<u64>,
    /// Length of the window
    window: Duration,
}

impl SlidingWindow {
    /// Create an empty window of the given length.
    pub fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
        }
    }

    /// Drop timestamps that are no longer strictly inside `(now - window, now]`.
    pub fn prune(&mut self, now_ms: u64) {
        let Some(window_start) = now_ms.checked_sub(self.window_ms()) else {
            return;
        };
        while matches!(self.timestamps.front(), Some(&ts) if ts <= window_start) {
            self.timestamps.pop_front();
        }
    }

    /// Record a request at `now_ms`.
    pub fn record(&mut self, now_ms: u64) {
        self.prune(now_ms);
        self.timestamps.push_back(now_ms);
    }

    /// Requests currently inside the window.
    pub fn count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The oldest timestamp still inside the window.
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    /// When the oldest request leaves the window, if any are recorded.
    pub fn next_release_ms(&self) -> Option<u64> {
        self.oldest().map(|ts| ts + self.window_ms())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the window length, keeping recorded timestamps.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        window.record(1_000);
        window.record(2_000);

        assert_eq!(window.count(), 2);
        assert_eq!(window.oldest(), Some(1_000));
        assert_eq!(window.next_release_ms(), Some(61_000));
    }

    #[test]
    fn test_prune_is_exclusive_at_boundary() {
        let mut window = SlidingWindow::new(Duration::from_secs(60));
        window.record(1_000);
        window.record(30_000);

        window.prune(60_999);
        assert_eq!(window.count(), 2);

        // Exactly one window later the first entry no longer counts
        window.prune(61_000);
        assert_eq!(window.count(), 1);
        assert_eq!(window.oldest(), Some(30_000));

        window.prune(200_000);
        assert!(window.is_empty());
    }

    #[test]
    fn test_record_prunes_stale_entries() {
        let mut window = SlidingWindow::new(Duration::from_secs(1));
        for ts in [0, 100, 200] {
            window.record(ts);
        }
        window.record(5_000);
        assert_eq!(window.count(), 1);
    }
}
