//! Test fixtures for worker pipelines.

use std::sync::Arc;
use std::time::Duration;

use super::mocks::ScriptedAgentClient;
use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::core::Task;
use crate::errors::ConfigError;
use crate::events::{CollectingEventSink, EventSink};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::worker::{AgentClient, WorkerExecutionPipeline, WorkerPipelineBuilder};

/// Target name used by the fixtures.
pub const TEST_TARGET: &str = "test-target";

/// Creates a pending task for [`TEST_TARGET`].
#[must_use]
pub fn test_task(description: &str) -> Task {
    Task::new(description, TEST_TARGET)
}

/// A retry policy with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    let config = RetryConfig::new()
        .with_max_attempts(max_attempts.max(1))
        .with_base_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(100))
        .with_jitter_fraction(0.0);
    RetryPolicy::new(config).unwrap_or_default()
}

/// A pipeline under test, with handles to its collaborators.
#[derive(Debug)]
pub struct TestFixture {
    /// The scripted client behind the pipeline.
    pub client: Arc<ScriptedAgentClient>,
    /// The breaker guarding [`TEST_TARGET`].
    pub breaker: Arc<CircuitBreaker>,
    /// Events emitted by the pipeline and breaker.
    pub events: Arc<CollectingEventSink>,
}

impl TestFixture {
    /// Wraps `client` with a breaker opening after `failure_threshold`
    /// failures.
    pub fn new(client: ScriptedAgentClient, failure_threshold: u32) -> Result<Self, ConfigError> {
        let events = Arc::new(CollectingEventSink::new());
        let breaker = CircuitBreaker::new(
            TEST_TARGET,
            BreakerConfig::new()
                .with_failure_threshold(failure_threshold)
                .with_success_threshold(1)
                .with_timeout(Duration::from_secs(30)),
        )?
        .with_event_sink(events.clone());

        Ok(Self {
            client: Arc::new(client),
            breaker: Arc::new(breaker),
            events,
        })
    }

    /// A builder wired to the fixture's client, breaker and event sink.
    #[must_use]
    pub fn builder(&self) -> WorkerPipelineBuilder {
        let client: Arc<dyn AgentClient> = self.client.clone();
        let events: Arc<dyn EventSink> = self.events.clone();
        WorkerExecutionPipeline::builder(TEST_TARGET, client)
            .breaker(Arc::clone(&self.breaker))
            .event_sink(events)
    }

    /// A pipeline without retry.
    #[must_use]
    pub fn pipeline(&self) -> WorkerExecutionPipeline {
        self.builder().build()
    }

    /// A pipeline retrying with [`fast_retry`].
    #[must_use]
    pub fn retrying_pipeline(&self, max_attempts: u32) -> WorkerExecutionPipeline {
        self.builder().retry_policy(fast_retry(max_attempts)).build()
    }
}
