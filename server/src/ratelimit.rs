//! Per-client sliding-window limits for chat and emotes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Action classes that are rate limited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Chat,
    Emote,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Chat => "chat",
            ActionClass::Emote => "emote",
        }
    }
}

/// At most `max_actions` within any `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_actions: usize,
    pub window: Duration,
}

impl RateLimit {
    pub const CHAT: RateLimit = RateLimit {
        max_actions: 5,
        window: Duration::from_secs(10),
    };

    pub const EMOTE: RateLimit = RateLimit {
        max_actions: 6,
        window: Duration::from_secs(4),
    };
}

/// Sliding window of accepted action timestamps.
///
/// Unlike a fixed window this only counts actions inside the trailing
/// window, so a burst straddling a window boundary is still limited.
#[derive(Debug, Default)]
pub struct SlidingWindow {
    history: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops timestamps that fell out of the window.
    fn expire_old_entries(&mut self, window: Duration, now: Instant) {
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns true and records the attempt if it is within `limit`.
    /// Rejected attempts are not recorded.
    pub fn check_and_record(&mut self, limit: &RateLimit) -> bool {
        self.check_and_record_at(limit, Instant::now())
    }

    pub fn check_and_record_at(&mut self, limit: &RateLimit, now: Instant) -> bool {
        self.expire_old_entries(limit.window, now);

        if self.history.len() >= limit.max_actions {
            return false;
        }

        self.history.push_back(now);
        true
    }

    /// Number of actions currently counted against the window.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max_actions: usize, window_ms: u64) -> RateLimit {
        RateLimit {
            max_actions,
            window: Duration::from_millis(window_ms),
        }
    }

    #[test]
    fn test_allows_up_to_limit() {
        let mut window = SlidingWindow::new();
        let now = Instant::now();
        let limit = limit(3, 1000);
        assert!(window.is_empty());

        assert!(window.check_and_record_at(&limit, now));
        assert!(window.check_and_record_at(&limit, now));
        assert!(window.check_and_record_at(&limit, now));
        assert!(!window.check_and_record_at(&limit, now));
        assert!(!window.is_empty());
    }

    #[test]
    fn test_rejected_attempts_are_not_recorded() {
        let mut window = SlidingWindow::new();
        let now = Instant::now();
        let limit = limit(1, 1000);

        assert!(window.check_and_record_at(&limit, now));
        for _ in 0..10 {
            assert!(!window.check_and_record_at(&limit, now));
        }
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_old_entries_expire_after_window() {
        let mut window = SlidingWindow::new();
        let start = Instant::now();
        let limit = limit(2, 1000);

        assert!(window.check_and_record_at(&limit, start));
        assert!(window.check_and_record_at(&limit, start + Duration::from_millis(500)));
        assert!(!window.check_and_record_at(&limit, start + Duration::from_millis(900)));

        // First entry is exactly one window old
        assert!(window.check_and_record_at(&limit, start + Duration::from_millis(1000)));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_boundary_burst_still_limited() {
        let mut window = SlidingWindow::new();
        let start = Instant::now();
        let limit = limit(5, 10_000);

        for i in 0..5 {
            assert!(window.check_and_record_at(&limit, start + Duration::from_millis(9_000 + i)));
        }

        // A fixed 10s window would reset here; the sliding one does not
        assert!(!window.check_and_record_at(&limit, start + Duration::from_millis(10_500)));
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(RateLimit::CHAT.max_actions, 5);
        assert_eq!(RateLimit::CHAT.window, Duration::from_secs(10));
        assert_eq!(RateLimit::EMOTE.max_actions, 6);
        assert_eq!(RateLimit::EMOTE.window, Duration::from_secs(4));
        assert_eq!(ActionClass::Chat.as_str(), "chat");
        assert_eq!(ActionClass::Emote.as_str(), "emote");
    }
}
