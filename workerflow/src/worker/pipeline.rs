//! The worker execution pipeline.

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument, Span};

use super::builder::WorkerPipelineBuilder;
use super::client::{AgentClient, TextStream};
use super::consumer::ResultConsumer;
use super::hooks::{PreconditionCheck, ResultPostProcessor};
use crate::breaker::{Admission, BreakerRegistry, CircuitBreaker};
use crate::cancellation::CancellationToken;
use crate::config::WorkerConfig;
use crate::core::{Task, TaskResult, TaskStatus};
use crate::errors::{ConfigError, WorkerError};
use crate::events::{
    EventSink, WORKER_CANCELLED, WORKER_COMPLETED, WORKER_FAILED, WORKER_FIRST_CHUNK,
    WORKER_STARTED,
};
use crate::retry::RetryPolicy;

/// Runs tasks against one target.
///
/// Each call validates the task, runs the precondition check, asks the
/// breaker for admission, then streams the agent's output through the retry
/// policy. Validation, precondition and circuit-open failures reach the caller
/// as they are. Every other failure is recorded against the breaker and
/// wrapped in [`WorkerError::WorkerExecutionFailed`].
///
/// The pipeline is cheap to clone and holds no per-call state.
#[derive(Clone)]
pub struct WorkerExecutionPipeline {
    pub(super) target: String,
    pub(super) client: Arc<dyn AgentClient>,
    pub(super) breaker: Option<Arc<CircuitBreaker>>,
    pub(super) retry: Option<RetryPolicy>,
    pub(super) call_timeout: Duration,
    pub(super) max_description_length: usize,
    pub(super) precondition: Arc<dyn PreconditionCheck>,
    pub(super) post_processor: Arc<dyn ResultPostProcessor>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) consumer: Option<Arc<dyn ResultConsumer>>,
}

enum Outcome {
    Completed,
    Failed(WorkerError),
    Cancelled(String),
}

impl WorkerExecutionPipeline {
    /// Starts building a pipeline for `target`.
    pub fn builder(target: impl Into<String>, client: Arc<dyn AgentClient>) -> WorkerPipelineBuilder {
        WorkerPipelineBuilder::new(target, client)
    }

    /// Builds a pipeline for `target` from host configuration, sharing the
    /// target's breaker through `registry`.
    pub fn from_config(
        target: &str,
        config: &WorkerConfig,
        registry: &BreakerRegistry,
        client: Arc<dyn AgentClient>,
    ) -> Result<Self, ConfigError> {
        let settings = config.target(target)?;
        settings.validate()?;

        let breaker = registry.get_or_register(target, settings.breaker_config())?;
        let retry = RetryPolicy::new(settings.retry_config())?.with_timeout(settings.call_timeout());

        Ok(Self::builder(target, client)
            .breaker(breaker)
            .retry_policy(retry)
            .call_timeout(settings.call_timeout())
            .max_description_length(config.max_description_length)
            .build())
    }

    /// Returns the target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the breaker guarding this target, if any.
    #[must_use]
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Streams the output of `task`.
    ///
    /// Nothing happens until the stream is polled. The stream ends after the
    /// first error. `task.status` is left untouched.
    pub fn execute(&self, task: &Task) -> TextStream {
        let span = self.span(task);
        self.stream_in(task.clone(), span)
    }

    /// Runs `task` to completion and returns its result.
    ///
    /// Marks the task in progress, then completed or failed. Errors are
    /// reported in the result, never returned.
    pub async fn execute_with_result(&self, task: &mut Task) -> TaskResult {
        let span = self.span(task);
        self.buffer(task, None).instrument(span).await
    }

    /// Like [`execute_with_result`](Self::execute_with_result), but stops
    /// when `token` is cancelled.
    ///
    /// A cancelled task keeps the output received so far. An attempt that
    /// had produced nothing is abandoned without a breaker outcome.
    pub async fn execute_with_cancel(&self, task: &mut Task, token: &CancellationToken) -> TaskResult {
        let span = self.span(task);
        self.buffer(task, Some(token)).instrument(span).await
    }

    fn span(&self, task: &Task) -> Span {
        tracing::info_span!("worker.execute", target = %self.target, task_id = %task.id)
    }

    fn stream_in(&self, task: Task, span: Span) -> TextStream {
        let pipeline = self.clone();

        async_stream::stream! {
            let mut admission = match pipeline.admit(&task).instrument(span.clone()).await {
                Ok(admission) => admission,
                Err(err) => {
                    pipeline.report_failure(&task, &err, 0).await;
                    yield Err(err);
                    return;
                }
            };
            pipeline.emit(WORKER_STARTED, &task, json!({})).await;

            let mut chunks = pipeline.call(&task);
            let mut chunk_count = 0_usize;
            loop {
                match chunks.next().instrument(span.clone()).await {
                    Some(Ok(chunk)) => {
                        if chunk_count == 0 {
                            if let Some(admission) = admission.as_mut() {
                                admission.record_success();
                            }
                            pipeline.emit(WORKER_FIRST_CHUNK, &task, json!({})).await;
                        }
                        chunk_count += 1;
                        yield Ok(chunk);
                    }
                    Some(Err(err)) => {
                        let err = pipeline.escalate(err, admission.as_mut());
                        pipeline.report_failure(&task, &err, chunk_count).await;
                        yield Err(err);
                        return;
                    }
                    None => break,
                }
            }

            if let Some(admission) = admission.as_mut() {
                if !admission.is_settled() {
                    admission.record_success();
                }
            }
        }
        .boxed()
    }

    async fn admit(&self, task: &Task) -> Result<Option<Admission>, WorkerError> {
        self.validate(task)?;
        if let Err(reason) = self.precondition.check(task).await {
            return Err(WorkerError::precondition(reason));
        }
        self.breaker.as_ref().map(CircuitBreaker::admit).transpose()
    }

    fn validate(&self, task: &Task) -> Result<(), WorkerError> {
        if task.description.trim().is_empty() {
            return Err(WorkerError::validation_field(
                "description",
                "Task description must not be empty",
            ));
        }
        let length = task.description.chars().count();
        if length > self.max_description_length {
            return Err(WorkerError::validation_field(
                "description",
                format!(
                    "Task description is {length} characters, limit is {}",
                    self.max_description_length
                ),
            ));
        }
        if task.target_name.is_empty() {
            return Err(WorkerError::validation_field(
                "target_name",
                "Task target must not be empty",
            ));
        }
        if task.target_name != self.target {
            return Err(WorkerError::validation_field(
                "target_name",
                format!(
                    "Task targets '{}' but this pipeline serves '{}'",
                    task.target_name, self.target
                ),
            ));
        }
        Ok(())
    }

    fn call(&self, task: &Task) -> TextStream {
        let client = Arc::clone(&self.client);
        let prompt = task.description.clone();
        let timeout = self.call_timeout;

        let attempt = move || {
            let client = Arc::clone(&client);
            let prompt = prompt.clone();
            async move { client.execute(&prompt, timeout).await }
        };

        match &self.retry {
            Some(policy) => policy.execute_streaming(attempt),
            None => stream::once(attempt()).try_flatten().boxed(),
        }
    }

    fn escalate(&self, err: WorkerError, admission: Option<&mut Admission>) -> WorkerError {
        if err.is_passthrough() {
            return err;
        }
        if let Some(admission) = admission {
            admission.record_failure(&err);
        }
        match err {
            WorkerError::WorkerExecutionFailed { .. } => err,
            cause => WorkerError::worker_failed(&self.target, cause),
        }
    }

    async fn report_failure(&self, task: &Task, err: &WorkerError, chunk_count: usize) {
        if err.is_passthrough() {
            debug!(target_name = %self.target, task_id = %task.id, error = %err, "Task rejected");
        } else {
            warn!(
                target_name = %self.target,
                task_id = %task.id,
                chunk_count,
                error = %err,
                "Worker call failed"
            );
        }
        self.emit(
            WORKER_FAILED,
            task,
            json!({ "error": err.to_dict(), "chunk_count": chunk_count }),
        )
        .await;
    }

    async fn emit(&self, event_type: &str, task: &Task, mut data: serde_json::Value) {
        if let Some(fields) = data.as_object_mut() {
            fields.insert("target".to_string(), json!(self.target));
            fields.insert("task_id".to_string(), json!(task.id));
        }
        self.events.emit(event_type, Some(data)).await;
    }

    async fn buffer(&self, task: &mut Task, token: Option<&CancellationToken>) -> TaskResult {
        let started_at = Utc::now();
        task.status = TaskStatus::InProgress;

        let mut chunks = self.stream_in(task.clone(), Span::current());
        let mut output = String::new();
        let mut chunk_count = 0_usize;

        let outcome = loop {
            let next = match token {
                Some(token) => tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        break Outcome::Cancelled(
                            token.reason().unwrap_or_else(|| "cancelled".to_string()),
                        );
                    }
                    next = chunks.next() => next,
                },
                None => chunks.next().await,
            };
            match next {
                Some(Ok(chunk)) => {
                    output.push_str(&chunk);
                    chunk_count += 1;
                }
                Some(Err(err)) => break Outcome::Failed(err),
                None => break Outcome::Completed,
            }
        };
        drop(chunks);

        let result = match outcome {
            Outcome::Completed => {
                task.status = TaskStatus::Completed;
                let result = TaskResult::completed(task.clone(), output, started_at)
                    .with_metadata("chunk_count", json!(chunk_count));
                let result = self.post_processor.process(result).await;
                debug!(chunk_count, duration_ms = result.duration_ms(), "Task completed");
                self.emit(
                    WORKER_COMPLETED,
                    task,
                    json!({ "chunk_count": chunk_count, "duration_ms": result.duration_ms() }),
                )
                .await;
                result
            }
            Outcome::Failed(err) => {
                task.status = TaskStatus::Failed;
                TaskResult::failed(task.clone(), output, err.to_string(), err.kind(), started_at)
                    .with_metadata("chunk_count", json!(chunk_count))
                    .with_metadata("error", json!(err.to_dict()))
            }
            Outcome::Cancelled(reason) => {
                task.status = TaskStatus::Cancelled;
                info!(reason = %reason, chunk_count, "Task cancelled");
                self.emit(
                    WORKER_CANCELLED,
                    task,
                    json!({ "reason": &reason, "chunk_count": chunk_count }),
                )
                .await;
                TaskResult::cancelled(task.clone(), output, reason, started_at)
                    .with_metadata("chunk_count", json!(chunk_count))
            }
        };

        if let Some(consumer) = &self.consumer {
            consumer.consume(&result).await;
        }
        result
    }
}

impl std::fmt::Debug for WorkerExecutionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutionPipeline")
            .field("target", &self.target)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .field("max_description_length", &self.max_description_length)
            .finish_non_exhaustive()
    }
}
