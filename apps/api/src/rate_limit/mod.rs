//! In-memory fixed-window rate limiter.
//!
//! One bucket per `"<endpoint>:<caller>"` key. A bucket counts requests from
//! the moment its window opens; once `window_ms` has elapsed the next request
//! opens a fresh window. Across a window boundary a caller can get up to
//! twice the limit through, which is accepted for abuse mitigation.
//!
//! Owned by the request mediator; thread-safe via `std::sync::Mutex`
//! (non-async, held briefly).

pub mod caller;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use crate::config::EndpointLimit;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start_ms: i64,
    window_ms: i64,
    count: u32,
}

impl Bucket {
    fn is_stale(&self, now_ms: i64) -> bool {
        now_ms - self.window_start_ms >= self.window_ms.saturating_mul(2)
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub admitted: bool,
    pub remaining: u32,
    pub reset_at_ms: i64,
}

impl RateDecision {
    /// Whole seconds until the window resets, rounded up, never below 1.
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let wait_ms = (self.reset_at_ms - now_ms).max(0) as u64;
        wait_ms.div_ceil(1000).max(1)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    max_buckets: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(max_buckets: usize) -> Self {
        Self {
            max_buckets,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str, limit: EndpointLimit) -> RateDecision {
        self.check_at(key, limit, Utc::now().timestamp_millis())
    }

    pub fn check_at(&self, key: &str, limit: EndpointLimit, now_ms: i64) -> RateDecision {
        let window_ms = i64::try_from(limit.window_ms).unwrap_or(i64::MAX);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        if buckets.len() > self.max_buckets {
            self.evict_stale(&mut buckets, now_ms);
        }

        match buckets.get_mut(key) {
            Some(bucket) if now_ms - bucket.window_start_ms < window_ms => {
                bucket.count = bucket.count.saturating_add(1);
                bucket.window_ms = window_ms;
                RateDecision {
                    admitted: bucket.count <= limit.limit,
                    remaining: limit.limit.saturating_sub(bucket.count),
                    reset_at_ms: bucket.window_start_ms.saturating_add(window_ms),
                }
            }
            _ => {
                buckets.insert(
                    key.to_string(),
                    Bucket {
                        window_start_ms: now_ms,
                        window_ms,
                        count: 1,
                    },
                );
                RateDecision {
                    admitted: true,
                    remaining: limit.limit.saturating_sub(1),
                    reset_at_ms: now_ms.saturating_add(window_ms),
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    fn count(&self, key: &str) -> Option<u32> {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|b| b.count)
    }

    /// Drops stale buckets until the population is back at the ceiling.
    fn evict_stale(&self, buckets: &mut HashMap<String, Bucket>, now_ms: i64) {
        let before = buckets.len();
        let mut excess = before - self.max_buckets;
        buckets.retain(|_, bucket| {
            if excess > 0 && bucket.is_stale(now_ms) {
                excess -= 1;
                false
            } else {
                true
            }
        });
        debug!(
            evicted = before - buckets.len(),
            remaining = buckets.len(),
            "Rate limiter eviction pass"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const LIMIT: EndpointLimit = EndpointLimit::new(20, 60_000);

    #[test]
    fn test_twenty_admitted_twenty_first_rejected() {
        let limiter = RateLimiter::new(5000);

        for i in 1..=20 {
            let decision = limiter.check_at("k", LIMIT, T0 + i);
            assert!(decision.admitted, "call {i} should be admitted");
            assert_eq!(decision.remaining, 20 - i as u32);
        }

        let rejected = limiter.check_at("k", LIMIT, T0 + 21);
        assert!(!rejected.admitted);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_at_ms, T0 + 1 + 60_000);
    }

    #[test]
    fn test_next_window_admits_again() {
        let limiter = RateLimiter::new(5000);
        let tight = EndpointLimit::new(1, 1000);

        assert!(limiter.check_at("k", tight, T0).admitted);
        assert!(!limiter.check_at("k", tight, T0 + 999).admitted);

        let fresh = limiter.check_at("k", tight, T0 + 1000);
        assert!(fresh.admitted);
        assert_eq!(fresh.reset_at_ms, T0 + 2000);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(5000);
        let tight = EndpointLimit::new(1, 60_000);

        assert!(limiter.check_at("api:chat:1.1.1.1", tight, T0).admitted);
        assert!(limiter.check_at("api:chat:2.2.2.2", tight, T0).admitted);
        assert!(limiter.check_at("api:other:1.1.1.1", tight, T0).admitted);
        assert!(!limiter.check_at("api:chat:1.1.1.1", tight, T0).admitted);
    }

    #[test]
    fn test_eviction_bounds_population() {
        let limiter = RateLimiter::new(10);
        let limit = EndpointLimit::new(5, 1000);

        for i in 0..11 {
            limiter.check_at(&format!("old-{i}"), limit, T0);
        }
        assert_eq!(limiter.len(), 11);

        // Stale once two windows have passed; the next call trims back to the ceiling.
        limiter.check_at("new", limit, T0 + 2000);
        assert_eq!(limiter.len(), 11);
    }

    #[test]
    fn test_eviction_keeps_fresh_buckets() {
        let limiter = RateLimiter::new(2);
        let limit = EndpointLimit::new(5, 60_000);

        for i in 0..3 {
            limiter.check_at(&format!("k{i}"), limit, T0);
        }
        limiter.check_at("k-new", limit, T0 + 10);
        assert_eq!(limiter.len(), 4);
    }

    #[test]
    fn test_concurrent_hits_on_one_key_are_all_counted() {
        const CALLERS: u32 = 64;
        let limiter = RateLimiter::new(5000);
        let limit = EndpointLimit::new(CALLERS / 2, 60_000);

        let shared = &limiter;
        let admitted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| s.spawn(move || shared.check_at("shared", limit, T0).admitted))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|admitted| *admitted)
                .count()
        });

        assert_eq!(admitted, (CALLERS / 2) as usize);
        assert_eq!(limiter.count("shared"), Some(CALLERS));
    }

    #[test]
    fn test_check_uses_wall_clock() {
        let limiter = RateLimiter::new(5000);
        let before = Utc::now().timestamp_millis();
        let decision = limiter.check("k", EndpointLimit::new(1, 60_000));
        assert!(decision.admitted);
        assert!(decision.reset_at_ms >= before + 60_000);
        assert!(!limiter.check("k", EndpointLimit::new(1, 60_000)).admitted);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateDecision {
            admitted: false,
            remaining: 0,
            reset_at_ms: T0 + 1500,
        };
        assert_eq!(decision.retry_after_secs(T0), 2);
        assert_eq!(decision.retry_after_secs(T0 + 1500), 1);
        assert_eq!(decision.retry_after_secs(T0 + 9999), 1);
    }
}
