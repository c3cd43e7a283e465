//! Retry policy: exponential backoff keyed on the error taxonomy.

use std::time::Duration;

use tracing::debug;

use crate::analyzer::ErrorKind;
use crate::domain::Task;

/// Backoff and retry-count configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5 * 60),
            backoff_factor: 2.0,
        }
    }
}

/// Decides whether a failed task goes back to pending and after how long.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy, normalizing nonsensical configuration back to the
    /// defaults.
    pub fn new(mut config: RetryConfig) -> Self {
        let defaults = RetryConfig::default();
        if config.max_retries == 0 {
            config.max_retries = defaults.max_retries;
        }
        if config.initial_delay.is_zero() {
            config.initial_delay = defaults.initial_delay;
        }
        if config.max_delay.is_zero() {
            config.max_delay = defaults.max_delay;
        }
        if config.backoff_factor <= 1.0 {
            config.backoff_factor = defaults.backoff_factor;
        }
        Self { config }
    }

    /// Whether the task should be retried for an error of the given kind.
    ///
    /// Retryable errors retry until `max_retries`; Unknown errors retry at
    /// most twice; NonRetryable and Fatal never retry.
    pub fn should_retry(&self, task: &Task, kind: ErrorKind) -> bool {
        if task.retry_count >= task.max_retries {
            debug!(id = %task.id, retries = task.retry_count, "Retry budget exhausted");
            return false;
        }

        match kind {
            ErrorKind::Retryable => true,
            ErrorKind::NonRetryable | ErrorKind::Fatal => false,
            ErrorKind::Unknown => task.retry_count < 2,
        }
    }

    /// Delay before attempt `retry_count`: `min(initial * factor^n, max)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let raw = self.config.initial_delay.as_secs_f64() * self.config.backoff_factor.powi(retry_count as i32);
        let capped = raw.min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_retries(count: u32, max: u32) -> Task {
        let mut t = Task::new("t", 5).with_id("t");
        t.retry_count = count;
        t.max_retries = max;
        t
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy::default();
        // min(5 * 2^n, 300) seconds
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(6), Duration::from_secs(300));
        assert_eq!(policy.delay_for(20), Duration::from_secs(300));
    }

    #[test]
    fn test_retryable_until_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&task_with_retries(0, 3), ErrorKind::Retryable));
        assert!(policy.should_retry(&task_with_retries(2, 3), ErrorKind::Retryable));
        assert!(!policy.should_retry(&task_with_retries(3, 3), ErrorKind::Retryable));
    }

    #[test]
    fn test_non_retryable_and_fatal_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&task_with_retries(0, 3), ErrorKind::NonRetryable));
        assert!(!policy.should_retry(&task_with_retries(0, 3), ErrorKind::Fatal));
    }

    #[test]
    fn test_unknown_retries_twice() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&task_with_retries(0, 5), ErrorKind::Unknown));
        assert!(policy.should_retry(&task_with_retries(1, 5), ErrorKind::Unknown));
        assert!(!policy.should_retry(&task_with_retries(2, 5), ErrorKind::Unknown));
    }

    #[test]
    fn test_config_normalization() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 0.5,
        });
        assert_eq!(policy.config().max_retries, 3);
        assert_eq!(policy.config().initial_delay, Duration::from_secs(5));
        assert_eq!(policy.config().backoff_factor, 2.0);
    }
}
