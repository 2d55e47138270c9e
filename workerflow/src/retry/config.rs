//! Retry configuration.

use std::collections::HashSet;
use std::time::Duration;

use crate::errors::{ConfigError, ErrorKind};

/// Bounds and backoff parameters for a [`RetryPolicy`](super::RetryPolicy).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap applied to the exponential delay before jitter.
    pub max_delay: Duration,
    /// Jitter added on top of the capped delay, as a fraction of it.
    pub jitter_fraction: f64,
    /// Error kinds that trigger another attempt.
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.1,
            retryable_kinds: [ErrorKind::Timeout, ErrorKind::Retryable].into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Replaces the set of retryable kinds.
    #[must_use]
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Adds one retryable kind.
    #[must_use]
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable_kinds.insert(kind);
        self
    }

    /// Reports the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay", "must be greater than 0"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                "must not be less than base_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::invalid(
                "jitter_fraction",
                "must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.retryable_kinds.contains(&ErrorKind::Timeout));
        assert!(config.retryable_kinds.contains(&ErrorKind::Retryable));
        assert!(!config.retryable_kinds.contains(&ErrorKind::Execution));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter_fraction(0.0)
            .with_retryable_kinds([ErrorKind::Timeout])
            .retry_on(ErrorKind::Execution);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(10));
        assert_eq!(config.retryable_kinds.len(), 2);
        assert!(!config.retryable_kinds.contains(&ErrorKind::Retryable));
    }

    #[test]
    fn test_validate_bounds() {
        let field = |config: RetryConfig| match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("expected invalid value, got {other:?}"),
        };

        assert_eq!(field(RetryConfig::new().with_max_attempts(0)), "max_attempts");
        assert_eq!(field(RetryConfig::new().with_base_delay(Duration::ZERO)), "base_delay");
        assert_eq!(
            field(RetryConfig::new().with_max_delay(Duration::from_millis(1))),
            "max_delay"
        );
        assert_eq!(field(RetryConfig::new().with_jitter_fraction(-0.1)), "jitter_fraction");
        assert_eq!(field(RetryConfig::new().with_jitter_fraction(f64::NAN)), "jitter_fraction");
    }
}
