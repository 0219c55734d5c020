use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-client admission check. Implementations must be safe to share across requests.
pub trait RateLimiter: Send + Sync {
    /// Counts the request against `key` and reports whether it may proceed.
    fn is_allowed(&self, key: &str) -> bool;
}

/// Fixed-window counter per key, kept in process memory.
#[derive(Debug, Clone)]
pub struct FixedWindowRateLimiter {
    windows: Arc<DashMap<String, (Instant, u32)>>,
    max_requests: u32,
    window: Duration,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    /// Drops windows that have fully elapsed.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, (start, _)| now.duration_since(*start) < self.window);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert((now, 0));
        let (start, count) = entry.value_mut();

        if now.duration_since(*start) >= self.window {
            *start = now;
            *count = 0;
        }
        if *count >= self.max_requests {
            tracing::warn!(
                key,
                count = *count,
                limit = self.max_requests,
                window = ?self.window,
                "rate limit exceeded"
            );
            return false;
        }
        *count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit() {
        let limiter = FixedWindowRateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.is_allowed("1.2.3.4"));
        assert!(limiter.is_allowed("1.2.3.4"));
        assert!(limiter.is_allowed("1.2.3.4"));
        assert!(!limiter.is_allowed("1.2.3.4"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        assert!(limiter.is_allowed("b"));
    }

    #[test]
    fn window_resets() {
        let limiter = FixedWindowRateLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.is_allowed("a"));
    }

    #[test]
    fn clones_share_counters() {
        let limiter = FixedWindowRateLimiter::new(2, Duration::from_secs(60));
        let other = limiter.clone();
        assert!(limiter.is_allowed("a"));
        assert!(other.is_allowed("a"));
        assert!(!limiter.is_allowed("a"));
    }

    #[test]
    fn purge_drops_elapsed_windows() {
        let limiter = FixedWindowRateLimiter::new(5, Duration::from_millis(20));
        limiter.is_allowed("a");
        limiter.is_allowed("b");
        assert_eq!(limiter.tracked_keys(), 2);
        std::thread::sleep(Duration::from_millis(30));
        limiter.purge_expired();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn concurrent_callers_never_exceed_limit() {
        let limiter = FixedWindowRateLimiter::new(50, Duration::from_secs(60));
        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let l = &limiter;
                    s.spawn(move || (0..20).filter(|_| l.is_allowed("shared")).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(allowed, 50);
    }
}
