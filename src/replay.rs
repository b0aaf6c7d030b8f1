//! Replay guard (spec.md §3, §4.D): rejects duplicate IVs within a sliding
//! window, shared across every stream handled by the process.
//!
//! Locking follows the same rule the teacher applies to its shared
//! broadcast/history state in `comms::Server` — the mutex is never held
//! across an `.await`, only around the synchronous map mutation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default replay window, per spec.md §4.D.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(30);

pub struct ReplayGuard {
    window: Duration,
    seen: Mutex<HashMap<[u8; 12], Instant>>,
}

impl ReplayGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Evicts stale entries, then checks `iv` against what remains. Returns
    /// `true` if `iv` is a duplicate (already seen within the window);
    /// otherwise records it and returns `false`.
    pub fn seen_or_add(&self, iv: [u8; 12], now: Instant) -> bool {
        let mut seen = self.seen.lock();
        seen.retain(|_, inserted_at| now.duration_since(*inserted_at) <= self.window);

        if seen.contains_key(&iv) {
            true
        } else {
            seen.insert(iv, now);
            false
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_is_not_a_duplicate() {
        let guard = ReplayGuard::new(Duration::from_secs(30));
        assert!(!guard.seen_or_add([1u8; 12], Instant::now()));
    }

    #[test]
    fn second_use_within_window_is_a_duplicate() {
        let guard = ReplayGuard::new(Duration::from_secs(30));
        let now = Instant::now();
        assert!(!guard.seen_or_add([1u8; 12], now));
        assert!(guard.seen_or_add([1u8; 12], now));
    }

    #[test]
    fn entry_expires_after_the_window() {
        let guard = ReplayGuard::new(Duration::from_millis(10));
        let t0 = Instant::now();
        assert!(!guard.seen_or_add([1u8; 12], t0));
        let t1 = t0 + Duration::from_millis(50);
        assert!(!guard.seen_or_add([1u8; 12], t1));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn distinct_ivs_do_not_collide() {
        let guard = ReplayGuard::new(Duration::from_secs(30));
        let now = Instant::now();
        assert!(!guard.seen_or_add([1u8; 12], now));
        assert!(!guard.seen_or_add([2u8; 12], now));
    }
}
