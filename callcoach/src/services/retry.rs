use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::error::CoachError;

/// Exponential backoff schedule for upstream calls.
///
/// Attempt `n` (1-based) that fails with a retryable error waits
/// `base_delay * 2^(n-1)`, capped at `max_delay`, before attempt `n + 1`.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub classifier: fn(&CoachError) -> bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            classifier: CoachError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            ..Default::default()
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, or `None` when `error` must not be
    /// retried or the attempt budget is spent.
    pub fn next_delay(&self, error: &CoachError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts || !(self.classifier)(error) {
            return None;
        }
        Some(self.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(60), Duration::from_secs(30));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let policy = RetryPolicy::default();
        let transient = CoachError::UpstreamTransient("502".to_string());
        let permanent = CoachError::UpstreamPermanent("400".to_string());

        assert_eq!(policy.next_delay(&transient, 1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(&permanent, 1), None);
        assert_eq!(
            policy.next_delay(&CoachError::UpstreamRateLimit { retry_after: None }, 2),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        let transient = CoachError::UpstreamTransient("timeout".to_string());
        assert!(policy.next_delay(&transient, 3).is_some());
        assert!(policy.next_delay(&transient, 4).is_none());
    }

    #[test]
    fn test_from_config() {
        let config = AnalysisConfig {
            retry_max_attempts: 0,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 1000,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
    }
}
