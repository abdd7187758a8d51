//! Per-key token bucket admission.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::TokenBucketConfig;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket limiter keyed by an arbitrary string (typically
/// `tenantId` or `providerId`). Refill is lazy: computed from elapsed time on
/// every call, never via a background task.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_period: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            capacity: config.capacity as f64,
            refill_period: config.refill_period.max(Duration::from_nanos(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true iff at least one token was available and has now been
    /// consumed for `key`.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let period_nanos = self.refill_period.as_nanos().max(1) as f64;
        let tokens_added = (elapsed.as_nanos() as f64 / period_nanos).floor();
        if tokens_added > 0.0 {
            bucket.tokens = (bucket.tokens + tokens_added).min(self.capacity);
            let advance = self.refill_period.mul_f64(tokens_added);
            bucket.last_refill += advance;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_exhaustion() {
        let limiter = TokenBucketLimiter::new(TokenBucketConfig {
            capacity: 3,
            refill_period: Duration::from_secs(3600),
        });
        assert!(limiter.try_acquire("t1"));
        assert!(limiter.try_acquire("t1"));
        assert!(limiter.try_acquire("t1"));
        assert!(!limiter.try_acquire("t1"));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(TokenBucketConfig {
            capacity: 1,
            refill_period: Duration::from_secs(3600),
        });
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
    }

    #[test]
    fn refill_over_time() {
        let limiter = TokenBucketLimiter::new(TokenBucketConfig {
            capacity: 2,
            refill_period: Duration::from_millis(10),
        });
        assert!(limiter.try_acquire("t"));
        assert!(limiter.try_acquire("t"));
        assert!(!limiter.try_acquire("t"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.try_acquire("t"));
    }
}
