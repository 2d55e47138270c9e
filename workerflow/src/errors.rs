//! Error types for workerflow.
//!
//! [`WorkerError`] is the closed taxonomy every execution path reports. Callers
//! match on [`WorkerError::kind`] rather than on message text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Discriminant of a [`WorkerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input to a call.
    Validation,
    /// A caller-defined business rule rejected the task.
    PreconditionFailed,
    /// The breaker denied admission.
    CircuitOpen,
    /// A single attempt exceeded its deadline.
    Timeout,
    /// Generic transient failure.
    Retryable,
    /// Opaque failure reported by the agent client.
    Execution,
    /// Terminal wrapper produced by the pipeline.
    WorkerExecutionFailed,
}

impl ErrorKind {
    /// Returns true for the kinds a pipeline surfaces to its caller.
    #[must_use]
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            Self::Validation
                | Self::PreconditionFailed
                | Self::CircuitOpen
                | Self::WorkerExecutionFailed
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::PreconditionFailed => write!(f, "precondition_failed"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::Timeout => write!(f, "timeout"),
            Self::Retryable => write!(f, "retryable"),
            Self::Execution => write!(f, "execution"),
            Self::WorkerExecutionFailed => write!(f, "worker_execution_failed"),
        }
    }
}

/// Shared, clonable handle to an opaque underlying error.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// The main error type for worker execution.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// The task failed input validation.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong.
        message: String,
        /// The offending field, when known.
        field: Option<String>,
    },

    /// The precondition check rejected the task.
    #[error("Precondition failed: {message}")]
    PreconditionFailed {
        /// Reason given by the check.
        message: String,
    },

    /// The circuit breaker for the target is not admitting calls.
    #[error("Circuit open for target '{target}'")]
    CircuitOpen {
        /// The protected target.
        target: String,
        /// Remaining cooldown, when the breaker is fully open.
        retry_after: Option<Duration>,
    },

    /// An attempt did not finish before its deadline.
    #[error("Timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// The deadline that was exceeded.
        elapsed: Duration,
    },

    /// A transient failure that may succeed on retry.
    #[error("Retryable error: {message}")]
    Retryable {
        /// Failure description.
        message: String,
    },

    /// The agent client failed in a way this crate does not interpret.
    #[error("Execution error: {message}")]
    Execution {
        /// Failure description.
        message: String,
        /// The original error, if the client supplied one.
        #[source]
        source: Option<ErrorSource>,
    },

    /// Terminal wrapper for infrastructure failures during a worker call.
    #[error("Worker execution failed for target '{target}': {message}")]
    WorkerExecutionFailed {
        /// The target the call was made against.
        target: String,
        /// Message of the underlying failure.
        message: String,
        /// The underlying failure.
        #[source]
        cause: Box<WorkerError>,
    },
}

impl WorkerError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error naming the offending field.
    #[must_use]
    pub fn validation_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Creates a circuit-open error.
    #[must_use]
    pub fn circuit_open(target: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::CircuitOpen {
            target: target.into(),
            retry_after,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Creates a retryable error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates an opaque execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an execution error wrapping an underlying error.
    #[must_use]
    pub fn execution_from<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Execution {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    /// Wraps `cause` as a terminal worker failure for `target`.
    #[must_use]
    pub fn worker_failed(target: impl Into<String>, cause: WorkerError) -> Self {
        Self::WorkerExecutionFailed {
            target: target.into(),
            message: cause.to_string(),
            cause: Box::new(cause),
        }
    }

    /// Returns the discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Retryable { .. } => ErrorKind::Retryable,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::WorkerExecutionFailed { .. } => ErrorKind::WorkerExecutionFailed,
        }
    }

    /// Returns true if the pipeline surfaces this error without wrapping it.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::PreconditionFailed | ErrorKind::CircuitOpen
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));

        match self {
            Self::Validation { field, .. } => {
                if let Some(field) = field {
                    map.insert("field".to_string(), serde_json::json!(field));
                }
            }
            Self::CircuitOpen { target, retry_after } => {
                map.insert("target".to_string(), serde_json::json!(target));
                if let Some(retry_after) = retry_after {
                    map.insert(
                        "retry_after_ms".to_string(),
                        serde_json::json!(millis(*retry_after)),
                    );
                }
            }
            Self::Timeout { elapsed } => {
                map.insert(
                    "elapsed_ms".to_string(),
                    serde_json::json!(millis(*elapsed)),
                );
            }
            Self::WorkerExecutionFailed { target, cause, .. } => {
                map.insert("target".to_string(), serde_json::json!(target));
                map.insert("cause_type".to_string(), serde_json::json!(cause.kind()));
            }
            Self::PreconditionFailed { .. } | Self::Retryable { .. } | Self::Execution { .. } => {}
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised while building breakers, retry policies and pipelines from
/// configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A numeric parameter is outside its allowed range.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A target referenced by name is not configured.
    #[error("Unknown target: {name}")]
    UnknownTarget {
        /// The target name.
        name: String,
    },

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(WorkerError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(WorkerError::precondition("x").kind(), ErrorKind::PreconditionFailed);
        assert_eq!(WorkerError::circuit_open("t", None).kind(), ErrorKind::CircuitOpen);
        assert_eq!(
            WorkerError::timeout(Duration::from_millis(5)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(WorkerError::retryable("x").kind(), ErrorKind::Retryable);
        assert_eq!(WorkerError::execution("x").kind(), ErrorKind::Execution);
    }

    #[test]
    fn test_decision_kinds() {
        assert!(ErrorKind::Validation.is_decision());
        assert!(ErrorKind::CircuitOpen.is_decision());
        assert!(ErrorKind::WorkerExecutionFailed.is_decision());
        assert!(!ErrorKind::Timeout.is_decision());
        assert!(!ErrorKind::Execution.is_decision());
    }

    #[test]
    fn test_worker_failed_keeps_cause() {
        let err = WorkerError::worker_failed("gpu-1", WorkerError::retryable("flaky"));

        assert_eq!(err.kind(), ErrorKind::WorkerExecutionFailed);
        assert!(err.to_string().contains("gpu-1"));
        assert!(err.to_string().contains("flaky"));

        let source = std::error::Error::source(&err).expect("cause is exposed as source");
        assert!(source.to_string().contains("flaky"));
    }

    #[test]
    fn test_execution_from_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = WorkerError::execution_from(io);

        assert!(err.to_string().contains("pipe closed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_to_dict() {
        let err = WorkerError::circuit_open("gpu-1", Some(Duration::from_millis(250)));
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "circuit_open");
        assert_eq!(dict.get("target").unwrap(), "gpu-1");
        assert_eq!(dict.get("retry_after_ms").unwrap(), 250);
    }

    #[test]
    fn test_to_dict_saturates_huge_durations() {
        let dict = WorkerError::timeout(Duration::MAX).to_dict();
        assert_eq!(dict.get("elapsed_ms").unwrap(), u64::MAX);
    }

    #[test]
    fn test_passthrough() {
        assert!(WorkerError::validation("x").is_passthrough());
        assert!(WorkerError::circuit_open("t", None).is_passthrough());
        assert!(!WorkerError::retryable("x").is_passthrough());
        assert!(!WorkerError::worker_failed("t", WorkerError::execution("x")).is_passthrough());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("failure_threshold", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'failure_threshold': must be greater than 0"
        );
    }
}
