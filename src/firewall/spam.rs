//! Sliding-window spam detection.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Spam detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamSettings {
    /// Messages a user may send inside the window before the next one
    /// is flagged.
    pub threshold: u32,
    /// Window width in seconds.
    pub window_seconds: u64,
    /// Whether flagged messages are deleted.
    pub delete_message: bool,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_seconds: 60,
            delete_message: false,
        }
    }
}

impl SpamSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Per-user sliding windows of message timestamps.
///
/// Timestamps older than the window are dropped on every record, so a
/// user's window never grows past threshold + 1 live entries under
/// steady flagging.
#[derive(Debug, Default)]
pub struct SpamTracker {
    windows: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl SpamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message from a user at `at` and report whether it
    /// crosses the threshold: detection fires on the first message that
    /// makes the in-window count exceed `threshold`.
    pub fn record(
        &mut self,
        user_id: &str,
        at: DateTime<Utc>,
        threshold: u32,
        window: Duration,
    ) -> bool {
        let entries = self.windows.entry(user_id.to_string()).or_default();

        let cutoff = at - chrono_window(window);
        while entries.front().is_some_and(|&front| front < cutoff) {
            entries.pop_front();
        }

        entries.push_back(at);
        entries.len() as u64 > threshold as u64
    }

    /// Number of in-window messages currently tracked for a user.
    pub fn window_len(&self, user_id: &str) -> usize {
        self.windows.get(user_id).map(VecDeque::len).unwrap_or(0)
    }

    /// Drop users whose most recent message is older than the window.
    /// Returns the number of users pruned.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - chrono_window(window);
        let before = self.windows.len();
        self.windows
            .retain(|_, entries| entries.back().is_some_and(|&back| back >= cutoff));
        before - self.windows.len()
    }

    /// Forget a single user's window.
    pub fn reset(&mut self, user_id: &str) {
        self.windows.remove(user_id);
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}

fn chrono_window(window: Duration) -> ChronoDuration {
    ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_detection_fires_on_sixth_message() {
        let mut tracker = SpamTracker::new();
        let window = Duration::from_secs(60);

        // Six messages within ten seconds, threshold five: the first
        // five pass, the sixth is flagged.
        for i in 0..5 {
            assert!(
                !tracker.record("u1", at(i * 2), 5, window),
                "message {} should not be flagged",
                i + 1
            );
        }
        assert!(tracker.record("u1", at(10), 5, window));
    }

    #[test]
    fn test_old_messages_fall_out_of_window() {
        let mut tracker = SpamTracker::new();
        let window = Duration::from_secs(60);

        for i in 0..5 {
            tracker.record("u1", at(i), 5, window);
        }
        // 61 seconds later everything has expired; this message is the
        // only one in the window.
        assert!(!tracker.record("u1", at(62), 5, window));
        assert_eq!(tracker.window_len("u1"), 1);
    }

    #[test]
    fn test_windows_are_per_user() {
        let mut tracker = SpamTracker::new();
        let window = Duration::from_secs(60);

        for i in 0..5 {
            tracker.record("u1", at(i), 2, window);
            tracker.record("u2", at(i), 5, window);
        }

        assert!(tracker.record("u1", at(6), 2, window));
        assert!(!tracker.record("u2", at(6), 5, window));
    }

    #[test]
    fn test_prune_drops_stale_users() {
        let mut tracker = SpamTracker::new();
        let window = Duration::from_secs(60);

        tracker.record("stale", at(0), 5, window);
        tracker.record("fresh", at(100), 5, window);

        let pruned = tracker.prune(at(120), window);
        assert_eq!(pruned, 1);
        assert_eq!(tracker.tracked_users(), 1);
        assert_eq!(tracker.window_len("stale"), 0);
        assert_eq!(tracker.window_len("fresh"), 1);
    }

    #[test]
    fn test_reset_clears_user() {
        let mut tracker = SpamTracker::new();
        tracker.record("u1", at(0), 5, Duration::from_secs(60));
        tracker.reset("u1");
        assert_eq!(tracker.window_len("u1"), 0);
    }
}
