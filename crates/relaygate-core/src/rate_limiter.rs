use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed-window limiter, one window per caller key (§6, §7). `per_minute ==
/// 0` disables the limiter entirely.
pub struct RateLimiter {
    per_minute: u32,
    windows: Mutex<HashMap<String, Window>>,
}

struct Window {
    started_at: i64,
    count: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `key` is still within its per-minute budget,
    /// incrementing its counter as a side effect.
    pub fn allow(&self, key: &str) -> bool {
        if self.per_minute == 0 {
            return true;
        }

        let now = now_unix();
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let window = windows.entry(key.to_string()).or_insert(Window { started_at: now, count: 0 });

        if now - window.started_at >= 60 {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= self.per_minute {
            return false;
        }
        window.count += 1;
        true
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(0);
        for _ in 0..1000 {
            assert!(limiter.allow("k"));
        }
    }

    #[test]
    fn limiter_rejects_past_budget_within_window() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn limiter_tracks_keys_independently() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("a"));
    }
}
