use crate::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window call budget keyed by workflow id.
///
/// A key is dropped once its window drains, so idle workflows hold no state.
///
/// `check_limit` followed by `record` is two separate steps: concurrent
/// callers for the same key may both pass the check before either records.
/// [`RateLimiter::try_acquire`] performs both under one lock and is what
/// the built-in nodes use.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_calls, config.window())
    }

    /// True while fewer than `max_calls` were recorded inside the window
    pub fn check_limit(&self, key: &str) -> bool {
        let mut calls = self.lock();
        let now = Instant::now();
        let used = self.prune_key(&mut calls, key, now);
        used < self.max_calls
    }

    pub fn record(&self, key: &str) {
        self.lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Instant::now());
    }

    /// Check and record atomically. Returns false when the budget is spent.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut calls = self.lock();
        let now = Instant::now();
        let used = self.prune_key(&mut calls, key, now);

        if used < self.max_calls {
            calls.entry(key.to_string()).or_default().push_back(now);
            true
        } else {
            tracing::debug!(key, max_calls = self.max_calls, "Rate limit reached");
            false
        }
    }

    /// Calls still available in the current window
    pub fn remaining(&self, key: &str) -> usize {
        let mut calls = self.lock();
        let now = Instant::now();
        let used = self.prune_key(&mut calls, key, now);
        self.max_calls.saturating_sub(used)
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Number of keys currently holding calls
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    /// Prune `key` and return how many calls remain in its window,
    /// removing the key when none do
    fn prune_key(&self, calls: &mut HashMap<String, VecDeque<Instant>>, key: &str, now: Instant) -> usize {
        let Some(window) = calls.get_mut(key) else {
            return 0;
        };
        self.prune(window, now);
        let used = window.len();
        if used == 0 {
            calls.remove(key);
        }
        used
    }

    fn prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
