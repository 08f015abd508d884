//! Retry policy for notification deliveries.
//!
//! Stateless: all logic lives in associated functions that take the
//! `DispatchConfig` as a parameter. Retry applies to notification side
//! effects only; graph progress is never retried this way.

use std::time::Duration;

use hrflow_types::config::DispatchConfig;

/// Stateless retry policy.
pub struct RetryPolicy;

impl RetryPolicy {
    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(config: &DispatchConfig, attempt: u32) -> bool {
        attempt < config.max_attempts
    }

    /// Delay before the attempt following `attempt`:
    /// `base_backoff_ms * 2^(attempt-1)`, saturating.
    pub fn backoff(config: &DispatchConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        Duration::from_millis(config.base_backoff_ms.saturating_mul(factor))
    }

    /// Upper bound for a single delivery attempt.
    pub fn attempt_timeout(config: &DispatchConfig) -> Duration {
        Duration::from_millis(config.attempt_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_within_budget() {
        let config = DispatchConfig::default();
        assert!(RetryPolicy::should_retry(&config, 1));
        assert!(RetryPolicy::should_retry(&config, 2));
        assert!(!RetryPolicy::should_retry(&config, 3));
        assert!(!RetryPolicy::should_retry(&config, 4));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = DispatchConfig::default();
        assert_eq!(RetryPolicy::backoff(&config, 1), Duration::from_millis(500));
        assert_eq!(RetryPolicy::backoff(&config, 2), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::backoff(&config, 3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_saturates() {
        let config = DispatchConfig {
            base_backoff_ms: u64::MAX / 2,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::backoff(&config, 40), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_attempt_timeout_from_config() {
        let config = DispatchConfig {
            attempt_timeout_ms: 250,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::attempt_timeout(&config), Duration::from_millis(250));
    }
}
