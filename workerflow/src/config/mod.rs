//! Per-target resilience configuration.
//!
//! The host loads this from wherever it keeps configuration; this module only
//! defines the shape, defaults and validation. Durations are stored as
//! seconds so the document stays human-editable:
//!
//! ```json
//! {
//!   "max_description_length": 8000,
//!   "defaults": { "max_attempts": 3, "call_timeout_seconds": 120.0 },
//!   "targets": {
//!     "gpu-1": { "failure_threshold": 3, "breaker_timeout_seconds": 30.0 }
//!   }
//! }
//! ```
//!
//! A target entry overrides only the fields it names; everything else comes
//! from `defaults`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::errors::ConfigError;
use crate::retry::RetryConfig;

/// Resilience settings for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the breaker.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Breaker cooldown in seconds.
    #[serde(default = "default_breaker_timeout")]
    pub breaker_timeout_seconds: f64,
    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: f64,
    /// Retry delay cap in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    /// Fraction of each delay added as random jitter.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Per-attempt deadline in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: f64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout() -> f64 {
    60.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_jitter_fraction() -> f64 {
    0.1
}

fn default_call_timeout() -> f64 {
    300.0
}

fn default_max_description_length() -> usize {
    10_000
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            breaker_timeout_seconds: default_breaker_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_seconds: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            jitter_fraction: default_jitter_fraction(),
            call_timeout_seconds: default_call_timeout(),
        }
    }
}

impl TargetConfig {
    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Gets the per-attempt deadline as a Duration.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        seconds(self.call_timeout_seconds)
    }

    /// Breaker settings for this target.
    #[must_use]
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout_seconds: self.breaker_timeout_seconds,
        }
    }

    /// Retry settings for this target.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(seconds(self.base_delay_seconds))
            .with_max_delay(seconds(self.max_delay_seconds))
            .with_jitter_fraction(self.jitter_fraction)
    }

    /// Checks every bound. Errors name the fields of this struct.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rename = |err: ConfigError| match err {
            ConfigError::InvalidValue { field, reason } => {
                let field = match field.as_str() {
                    "timeout_seconds" => "breaker_timeout_seconds".to_string(),
                    "base_delay" | "max_delay" => format!("{field}_seconds"),
                    _ => field,
                };
                ConfigError::InvalidValue { field, reason }
            }
            other => other,
        };
        self.breaker_config().validate().map_err(rename)?;
        self.retry_config().validate().map_err(rename)?;
        if !self.call_timeout_seconds.is_finite() || self.call_timeout_seconds <= 0.0 {
            return Err(ConfigError::invalid("call_timeout_seconds", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Configuration for every target a host talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Longest accepted task description, in characters.
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
    /// Values used for any field a target does not set.
    #[serde(default)]
    pub defaults: TargetConfig,
    /// Per-target overrides, as raw JSON objects merged over `defaults`.
    #[serde(default)]
    pub targets: HashMap<String, serde_json::Value>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_description_length: default_max_description_length(),
            defaults: TargetConfig::default(),
            targets: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Creates an empty configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Adds a target with fully specified settings.
    #[must_use]
    pub fn with_target(mut self, name: impl Into<String>, target: &TargetConfig) -> Self {
        self.targets.insert(
            name.into(),
            serde_json::to_value(target).unwrap_or_else(|_| serde_json::json!({})),
        );
        self
    }

    /// Resolves the settings for `name` by merging its overrides over the
    /// defaults.
    pub fn target(&self, name: &str) -> Result<TargetConfig, ConfigError> {
        let overrides = self.targets.get(name).ok_or_else(|| ConfigError::UnknownTarget {
            name: name.to_string(),
        })?;

        let mut merged = serde_json::to_value(&self.defaults)?;
        if let (Some(base), Some(fields)) = (merged.as_object_mut(), overrides.as_object()) {
            for (key, value) in fields {
                base.insert(key.clone(), value.clone());
            }
        } else if !overrides.is_null() {
            return Err(ConfigError::invalid(
                format!("targets.{name}"),
                "must be a JSON object",
            ));
        }

        Ok(serde_json::from_value(merged)?)
    }

    /// Validates the defaults and every target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_description_length == 0 {
            return Err(ConfigError::invalid(
                "max_description_length",
                "must be greater than 0",
            ));
        }
        self.defaults.validate()?;
        for name in self.targets.keys() {
            self.target(name)?.validate().map_err(|err| match err {
                ConfigError::InvalidValue { field, reason } => {
                    ConfigError::invalid(format!("targets.{name}.{field}"), reason)
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    #[test]
    fn test_defaults_are_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
        assert!(TargetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_target_overrides_merge_over_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "defaults": { "max_attempts": 4, "call_timeout_seconds": 10.0 },
                "targets": {
                    "gpu-1": { "failure_threshold": 2 },
                    "gpu-2": {}
                }
            }"#,
        )
        .unwrap();

        let gpu1 = config.target("gpu-1").unwrap();
        assert_eq!(gpu1.failure_threshold, 2);
        assert_eq!(gpu1.max_attempts, 4);
        assert_eq!(gpu1.call_timeout(), Duration::from_secs(10));

        let gpu2 = config.target("gpu-2").unwrap();
        assert_eq!(gpu2.failure_threshold, 5);
    }

    #[test]
    fn test_huge_delays_do_not_panic_backoff() {
        let config = WorkerConfig::from_json_str(
            r#"{
                "defaults": {
                    "base_delay_seconds": 1e30,
                    "max_delay_seconds": 1e30,
                    "jitter_fraction": 0.5
                },
                "targets": { "gpu-1": {} }
            }"#,
        )
        .unwrap();

        let policy = RetryPolicy::new(config.target("gpu-1").unwrap().retry_config()).unwrap();
        assert_eq!(policy.delay(1), Duration::MAX);
        assert_eq!(policy.delay(5), Duration::MAX);
    }

    #[test]
    fn test_unknown_target() {
        let err = WorkerConfig::default().target("missing").unwrap_err();
        assert_eq!(err, ConfigError::UnknownTarget { name: "missing".into() });
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = WorkerConfig::from_json_str(
            r#"{ "targets": { "gpu-1": { "jitter_fraction": 1.5 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "targets.gpu-1.jitter_fraction"
        ));

        let err = WorkerConfig::from_json_str(r#"{ "defaults": { "max_attempts": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_attempts"));
    }

    #[test]
    fn test_malformed_json() {
        let err = WorkerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_target_conversions() {
        let target = TargetConfig::default().with_max_attempts(5);

        let retry = target.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.base_delay, Duration::from_secs(1));

        let breaker = target.breaker_config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_with_target_round_trips() {
        let config = WorkerConfig::new()
            .with_target("gpu-1", &TargetConfig::default().with_failure_threshold(1));

        assert_eq!(config.target("gpu-1").unwrap().failure_threshold, 1);
    }
}
