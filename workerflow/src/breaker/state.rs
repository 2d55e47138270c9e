//! Breaker mode and per-target bookkeeping record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

use crate::errors::millis;

/// The admission mode of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A single probe call is admitted to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Mutable health record of one target.
///
/// Breakers hand out clones of this record as read-only snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
    /// Current mode.
    pub mode: CircuitMode,
    /// Consecutive failures while closed.
    pub failure_count: u32,
    /// Consecutive successes while half-open.
    pub success_count: u32,
    /// Calls admitted and not yet settled. At most 1 while half-open.
    pub in_flight: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// When the breaker last opened.
    pub opened_at: Option<Instant>,
}

impl CircuitState {
    /// Returns true if the breaker is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mode == CircuitMode::Closed
    }

    /// Returns true if the breaker is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.mode == CircuitMode::Open
    }

    /// Converts to a dictionary representation.
    ///
    /// Instants are rendered as milliseconds elapsed up to now.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let now = Instant::now();
        let ago_ms = |at: Option<Instant>| {
            at.map_or(serde_json::Value::Null, |at| {
                serde_json::json!(millis(now.saturating_duration_since(at)))
            })
        };

        let mut map = HashMap::new();
        map.insert("mode".to_string(), serde_json::json!(self.mode));
        map.insert("failure_count".to_string(), serde_json::json!(self.failure_count));
        map.insert("success_count".to_string(), serde_json::json!(self.success_count));
        map.insert("in_flight".to_string(), serde_json::json!(self.in_flight));
        map.insert("opened_ms_ago".to_string(), ago_ms(self.opened_at));
        map.insert("last_failure_ms_ago".to_string(), ago_ms(self.last_failure_at));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_closed() {
        let state = CircuitState::default();

        assert!(state.is_closed());
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.in_flight, 0);
        assert!(state.opened_at.is_none());
    }

    #[test]
    fn test_mode_serialize() {
        assert_eq!(serde_json::to_string(&CircuitMode::HalfOpen).unwrap(), r#""half_open""#);
        assert_eq!(CircuitMode::Open.to_string(), "open");
    }

    #[test]
    fn test_to_dict() {
        let state = CircuitState {
            mode: CircuitMode::Open,
            failure_count: 3,
            opened_at: Some(Instant::now()),
            ..CircuitState::default()
        };

        let dict = state.to_dict();
        assert_eq!(dict.get("mode").unwrap(), "open");
        assert_eq!(dict.get("failure_count").unwrap(), 3);
        assert!(dict.get("opened_ms_ago").unwrap().is_u64());
        assert!(dict.get("last_failure_ms_ago").unwrap().is_null());
    }
}
