//! Fixed-window rate limiting shared by every subject and tool.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Counter for one key within the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub subject_key: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

/// A window that was already at its ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateExceeded {
    pub subject_key: String,
    pub ceiling: u32,
    pub retry_after_secs: u64,
}

/// A key and the ceiling it is held to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateKey {
    pub key: String,
    pub ceiling: u32,
}

impl RateKey {
    pub fn new(key: impl Into<String>, ceiling: u32) -> Self {
        Self {
            key: key.into(),
            ceiling,
        }
    }
}

/// All windows live behind one narrow mutex. Windows roll over lazily on
/// the first acquisition after they expire.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_acquire(&self, keys: &[RateKey]) -> Result<(), RateExceeded> {
        self.try_acquire_at(keys, Utc::now())
    }

    /// Check every key, then count against every key. Either all windows
    /// are incremented or none is.
    pub fn try_acquire_at(&self, keys: &[RateKey], now: DateTime<Utc>) -> Result<(), RateExceeded> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());

        for rk in keys {
            let window = windows
                .entry(rk.key.clone())
                .or_insert_with(|| RateWindow {
                    subject_key: rk.key.clone(),
                    window_start: now,
                    count: 0,
                });
            if now - window.window_start >= self.window {
                window.window_start = now;
                window.count = 0;
            }
            if window.count >= rk.ceiling {
                let reset_at = window.window_start + self.window;
                return Err(RateExceeded {
                    subject_key: rk.key.clone(),
                    ceiling: rk.ceiling,
                    retry_after_secs: (reset_at - now).num_seconds().max(1) as u64,
                });
            }
        }

        for rk in keys {
            if let Some(window) = windows.get_mut(&rk.key) {
                window.count += 1;
            }
        }
        Ok(())
    }

    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn ceiling_admits_exactly_n_per_window() {
        let limiter = RateLimiter::new(60);
        let keys = [RateKey::new("user:alice", 3)];
        for _ in 0..3 {
            limiter.try_acquire_at(&keys, t0()).unwrap();
        }
        let err = limiter
            .try_acquire_at(&keys, t0() + Duration::seconds(10))
            .unwrap_err();
        assert_eq!(err.ceiling, 3);
        assert_eq!(err.retry_after_secs, 50);
        assert_eq!(limiter.window("user:alice").unwrap().count, 3);
    }

    #[test]
    fn window_rolls_over_lazily() {
        let limiter = RateLimiter::new(60);
        let keys = [RateKey::new("k", 1)];
        limiter.try_acquire_at(&keys, t0()).unwrap();
        assert!(limiter.try_acquire_at(&keys, t0() + Duration::seconds(59)).is_err());
        limiter
            .try_acquire_at(&keys, t0() + Duration::seconds(60))
            .unwrap();
        let w = limiter.window("k").unwrap();
        assert_eq!(w.count, 1);
        assert_eq!(w.window_start, t0() + Duration::seconds(60));
    }

    #[test]
    fn denial_on_one_key_counts_against_none() {
        let limiter = RateLimiter::new(60);
        limiter
            .try_acquire_at(&[RateKey::new("tool:calc", 1)], t0())
            .unwrap();

        let both = [RateKey::new("user:bob", 5), RateKey::new("tool:calc", 1)];
        let err = limiter.try_acquire_at(&both, t0()).unwrap_err();
        assert_eq!(err.subject_key, "tool:calc");
        assert_eq!(limiter.window("user:bob").unwrap().count, 0);
    }
}
