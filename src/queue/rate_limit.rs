//! Per-key exponential backoff and the retry policy applied on top of it.

use crate::key::ResourceKey;
use crate::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Per-key exponential failure backoff.
///
/// The n-th consecutive failure of a key (0-based) waits
/// `min(base * 2^n, max)`. Failure counts are independent per key and
/// reset by [`ExponentialBackoff::forget`].
#[derive(Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&self, key: &ResourceKey) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);
        self.delay_for(exp)
    }

    /// Delay for the given 0-based failure count, without recording anything.
    pub fn delay_for(&self, failures: u32) -> Duration {
        // 2^32 already overflows any sane base, so clamp the shift.
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Number of failures recorded for `key` since the last `forget`.
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &ResourceKey) {
        lock(&self.failures).remove(key);
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

/// How many times a failing key is retried before it is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }

    pub fn limited(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
        }
    }

    /// Whether a key that has already been requeued `requeues` times may be
    /// requeued again.
    pub fn should_retry(&self, requeues: u32) -> bool {
        self.max_retries.is_none_or(|max| requeues < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ResourceKey {
        ResourceKey::parse(s).unwrap()
    }

    #[test]
    fn delays_double_until_capped() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let k = key("default/a1");

        let delays: Vec<_> = (0..6).map(|_| backoff.when(&k)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40),
                Duration::from_secs(60),
                Duration::from_secs(60),
            ]
        );
        assert_eq!(backoff.num_requeues(&k), 6);
    }

    #[test]
    fn huge_failure_counts_saturate_at_max() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(64), Duration::from_secs(60));
    }

    #[test]
    fn keys_back_off_independently() {
        let backoff = ExponentialBackoff::default();
        let a = key("default/a");
        let b = key("default/b");
        backoff.when(&a);
        backoff.when(&a);
        assert_eq!(backoff.when(&b), Duration::from_secs(5));
        assert_eq!(backoff.num_requeues(&a), 2);
    }

    #[test]
    fn retry_policy_limits() {
        assert!(RetryPolicy::unbounded().should_retry(u32::MAX));
        let limited = RetryPolicy::limited(3);
        assert!(limited.should_retry(2));
        assert!(!limited.should_retry(3));
        assert!(!RetryPolicy::limited(0).should_retry(0));
    }
}
