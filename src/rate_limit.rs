//! Per-principal rate limiting for sensitive auth mutations.
//!
//! Buckets are process-local and keyed by user id. Each bucket refills over
//! time up to a fixed capacity; a check consumes tokens atomically under the
//! bucket map lock, so concurrent checks for the same principal cannot both
//! pass on the last token.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Actions bounded by per-account buckets.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RateLimitAction {
    TotpUpdate,
    TotpVerify,
    RecoveryCode,
    PasswordChange,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    /// Consume `cost` tokens from the bucket for `user_id` and `action`.
    fn check_user(&self, user_id: i64, action: RateLimitAction, cost: u32) -> RateLimitDecision;
}

/// Limiter that admits everything. Used in tests and as a wiring default.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_user(&self, _user_id: i64, _action: RateLimitAction, _cost: u32) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

struct Bucket {
    tokens: u32,
    refilled_at: Instant,
}

/// Token bucket refilling one token per `refill_interval`, capped at `max`.
pub struct RefillingTokenBucket<K: Eq + Hash> {
    max: u32,
    refill_interval: Duration,
    buckets: Mutex<HashMap<K, Bucket>>,
}

impl<K: Eq + Hash> RefillingTokenBucket<K> {
    #[must_use]
    pub fn new(max: u32, refill_interval: Duration) -> Self {
        Self {
            max,
            refill_interval,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume `cost` tokens for `key`. Returns false when the bucket is dry.
    pub fn check(&self, key: K, cost: u32) -> bool {
        self.check_at(key, cost, Instant::now())
    }

    fn check_at(&self, key: K, cost: u32, now: Instant) -> bool {
        let Ok(mut buckets) = self.buckets.lock() else {
            // A poisoned lock means a panic elsewhere; fail closed.
            return false;
        };
        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: self.max,
            refilled_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.refilled_at);
        if !self.refill_interval.is_zero() {
            let refill = elapsed.as_millis() / self.refill_interval.as_millis().max(1);
            if refill > 0 {
                let refill = u32::try_from(refill).unwrap_or(u32::MAX);
                bucket.tokens = bucket.tokens.saturating_add(refill).min(self.max);
                bucket.refilled_at = now;
            }
        }

        if bucket.tokens < cost {
            return false;
        }
        bucket.tokens -= cost;
        true
    }
}

/// Bucketed limiter covering every sensitive mutation, keyed by user id.
pub struct TokenBucketRateLimiter {
    totp_update: RefillingTokenBucket<i64>,
    totp_verify: RefillingTokenBucket<i64>,
    recovery_code: RefillingTokenBucket<i64>,
    password_change: RefillingTokenBucket<i64>,
}

impl TokenBucketRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Credential mutations are rare; keep them tight.
            totp_update: RefillingTokenBucket::new(3, Duration::from_secs(10 * 60)),
            totp_verify: RefillingTokenBucket::new(5, Duration::from_secs(30)),
            recovery_code: RefillingTokenBucket::new(3, Duration::from_secs(60)),
            password_change: RefillingTokenBucket::new(5, Duration::from_secs(60)),
        }
    }
}

impl Default for TokenBucketRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for TokenBucketRateLimiter {
    fn check_user(&self, user_id: i64, action: RateLimitAction, cost: u32) -> RateLimitDecision {
        let admitted = match action {
            RateLimitAction::TotpUpdate => self.totp_update.check(user_id, cost),
            RateLimitAction::TotpVerify => self.totp_verify.check(user_id, cost),
            RateLimitAction::RecoveryCode => self.recovery_code.check(user_id, cost),
            RateLimitAction::PasswordChange => self.password_change.check(user_id, cost),
        };
        if admitted {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Limited
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_user(1, RateLimitAction::TotpUpdate, 1),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn bucket_denies_after_capacity_and_refills() {
        let bucket = RefillingTokenBucket::new(3, Duration::from_secs(10));
        let start = Instant::now();
        assert!(bucket.check_at(7, 1, start));
        assert!(bucket.check_at(7, 1, start));
        assert!(bucket.check_at(7, 1, start));
        // Fourth call within the window is denied.
        assert!(!bucket.check_at(7, 1, start));
        // One refill interval later a single token is back.
        let later = start + Duration::from_secs(10);
        assert!(bucket.check_at(7, 1, later));
        assert!(!bucket.check_at(7, 1, later));
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let bucket = RefillingTokenBucket::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(bucket.check_at(1, 1, now));
        assert!(!bucket.check_at(1, 1, now));
        assert!(bucket.check_at(2, 1, now));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let bucket = RefillingTokenBucket::new(2, Duration::from_secs(1));
        let start = Instant::now();
        assert!(bucket.check_at(9, 2, start));
        let much_later = start + Duration::from_secs(3600);
        assert!(bucket.check_at(9, 2, much_later));
        assert!(!bucket.check_at(9, 1, much_later));
    }

    #[test]
    fn cost_larger_than_capacity_is_always_denied() {
        let bucket = RefillingTokenBucket::new(2, Duration::from_secs(1));
        assert!(!bucket.check_at(4, 3, Instant::now()));
    }

    #[test]
    fn limiter_maps_actions_to_separate_buckets() {
        let limiter = TokenBucketRateLimiter::new();
        for _ in 0..3 {
            assert_eq!(
                limiter.check_user(5, RateLimitAction::TotpUpdate, 1),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_user(5, RateLimitAction::TotpUpdate, 1),
            RateLimitDecision::Limited
        );
        // Exhausting TOTP updates must not affect recovery attempts.
        assert_eq!(
            limiter.check_user(5, RateLimitAction::RecoveryCode, 1),
            RateLimitDecision::Allowed
        );
    }
}
