//! Builder for [`WorkerExecutionPipeline`].

use std::sync::Arc;
use std::time::Duration;

use super::client::AgentClient;
use super::consumer::ResultConsumer;
use super::hooks::{AllowAll, IdentityPostProcessor, PreconditionCheck, ResultPostProcessor};
use super::pipeline::WorkerExecutionPipeline;
use crate::breaker::CircuitBreaker;
use crate::events::{EventSink, NoOpEventSink};
use crate::retry::RetryPolicy;

/// Default per-call deadline handed to the agent client.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Default upper bound on task description length, in characters.
pub const DEFAULT_MAX_DESCRIPTION_LENGTH: usize = 10_000;

/// Builds a [`WorkerExecutionPipeline`].
pub struct WorkerPipelineBuilder {
    target: String,
    client: Arc<dyn AgentClient>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    call_timeout: Duration,
    max_description_length: usize,
    precondition: Arc<dyn PreconditionCheck>,
    post_processor: Arc<dyn ResultPostProcessor>,
    events: Arc<dyn EventSink>,
    consumer: Option<Arc<dyn ResultConsumer>>,
}

impl WorkerPipelineBuilder {
    pub(crate) fn new(target: impl Into<String>, client: Arc<dyn AgentClient>) -> Self {
        Self {
            target: target.into(),
            client,
            breaker: None,
            retry: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_description_length: DEFAULT_MAX_DESCRIPTION_LENGTH,
            precondition: Arc::new(AllowAll),
            post_processor: Arc::new(IdentityPostProcessor),
            events: Arc::new(NoOpEventSink),
            consumer: None,
        }
    }

    /// Guards calls with `breaker`.
    #[must_use]
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Retries calls with `policy`.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the deadline passed to the agent client.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the longest accepted description.
    #[must_use]
    pub fn max_description_length(mut self, length: usize) -> Self {
        self.max_description_length = length;
        self
    }

    /// Sets the precondition check.
    #[must_use]
    pub fn precondition(mut self, check: impl PreconditionCheck + 'static) -> Self {
        self.precondition = Arc::new(check);
        self
    }

    /// Sets the post-processor for successful results.
    #[must_use]
    pub fn post_processor(mut self, processor: impl ResultPostProcessor + 'static) -> Self {
        self.post_processor = Arc::new(processor);
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Hands every buffered result to `consumer`.
    #[must_use]
    pub fn result_consumer(mut self, consumer: Arc<dyn ResultConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> WorkerExecutionPipeline {
        WorkerExecutionPipeline {
            target: self.target,
            client: self.client,
            breaker: self.breaker,
            retry: self.retry,
            call_timeout: self.call_timeout,
            max_description_length: self.max_description_length,
            precondition: self.precondition,
            post_processor: self.post_processor,
            events: self.events,
            consumer: self.consumer,
        }
    }
}

impl std::fmt::Debug for WorkerPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPipelineBuilder")
            .field("target", &self.target)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}
