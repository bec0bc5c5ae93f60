//! Retry policy for API calls.

use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff unit.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

/// Linear backoff retry policy.
///
/// Attempt `n` (1-based) waits `base_delay * n` before retrying, so the
/// defaults give delays of 250, 500 and 750 ms and at most four attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Whether a response status should be retried.
///
/// Anything outside 2xx is retried except 4xx.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    let failed = !(200..=299).contains(&status);
    failed && !(400..500).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(750));
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn test_retryable_status() {
        for status in [100, 199, 301, 304, 399, 500, 502, 503, 599] {
            assert!(is_retryable_status(status), "{} should retry", status);
        }
        for status in [200, 201, 204, 299, 400, 401, 404, 422, 499] {
            assert!(!is_retryable_status(status), "{} should not retry", status);
        }
    }
}
