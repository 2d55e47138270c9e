//! Per-target breaker registry owned by the host process.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::config::WorkerConfig;
use crate::errors::ConfigError;
use crate::events::{EventSink, NoOpEventSink};

/// One breaker per target name.
///
/// Built once at startup and shared by `Arc` with every pipeline that calls
/// one of its targets.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("targets", &self.names())
            .finish()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Creates an empty registry whose breakers report to `events`.
    #[must_use]
    pub fn with_event_sink(events: Arc<dyn EventSink>) -> Self {
        Self {
            breakers: DashMap::new(),
            events,
        }
    }

    /// Builds one breaker per configured target.
    pub fn from_config(
        config: &WorkerConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        let registry = Self::with_event_sink(events);
        for name in config.targets.keys() {
            let target = config.target(name)?;
            registry.register(name.clone(), target.breaker_config())?;
        }
        Ok(registry)
    }

    /// Creates and stores a breaker for `name`, replacing any existing one.
    pub fn register(
        &self,
        name: impl Into<String>,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        let name = name.into();
        let breaker =
            Arc::new(CircuitBreaker::new(name.clone(), config)?.with_event_sink(self.events.clone()));
        self.breakers.insert(name, Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Returns the breaker for `name`, creating it with `config` if absent.
    pub fn get_or_register(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, ConfigError> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let breaker =
            Arc::new(CircuitBreaker::new(name, config)?.with_event_sink(self.events.clone()));
        Ok(Arc::clone(
            self.breakers.entry(name.to_string()).or_insert(breaker).value(),
        ))
    }

    /// Looks up the breaker for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the registered target names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the number of registered breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshots every breaker's state.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    /// Resets every breaker to closed.
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitMode;
    use crate::config::TargetConfig;
    use crate::errors::WorkerError;

    #[test]
    fn test_register_and_get() {
        let registry = BreakerRegistry::new();
        assert!(registry.is_empty());

        let breaker = registry.register("gpu-1", BreakerConfig::default()).unwrap();
        let fetched = registry.get("gpu-1").unwrap();

        assert!(Arc::ptr_eq(&breaker, &fetched));
        assert!(registry.get("gpu-2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_register_reuses_existing() {
        let registry = BreakerRegistry::new();
        let first = registry.get_or_register("gpu-1", BreakerConfig::default()).unwrap();
        let second = registry
            .get_or_register("gpu-1", BreakerConfig::new().with_failure_threshold(1))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 5);
    }

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = BreakerRegistry::new();
        let result = registry.register("gpu-1", BreakerConfig::new().with_success_threshold(0));

        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config_builds_one_breaker_per_target() {
        let config = WorkerConfig::new()
            .with_target("gpu-1", &TargetConfig::default())
            .with_target("gpu-2", &TargetConfig::default().with_failure_threshold(1));

        let registry = BreakerRegistry::from_config(&config, Arc::new(NoOpEventSink)).unwrap();

        assert_eq!(registry.names(), vec!["gpu-1", "gpu-2"]);
        assert_eq!(registry.get("gpu-2").unwrap().config().failure_threshold, 1);
    }

    #[test]
    fn test_snapshot_and_reset_all() {
        let registry = BreakerRegistry::new();
        let breaker = registry
            .register("gpu-1", BreakerConfig::new().with_failure_threshold(1))
            .unwrap();
        registry.register("gpu-2", BreakerConfig::default()).unwrap();

        breaker.record_failure(&WorkerError::execution("down"));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot["gpu-1"].mode, CircuitMode::Open);
        assert_eq!(snapshot["gpu-2"].mode, CircuitMode::Closed);

        registry.reset_all();
        assert!(registry.snapshot().values().all(CircuitState::is_closed));
    }
}
