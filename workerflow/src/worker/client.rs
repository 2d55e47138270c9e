//! The outbound agent client boundary.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::errors::WorkerError;

/// Text chunks produced by an agent, in order.
pub type TextStream = BoxStream<'static, Result<String, WorkerError>>;

/// Performs a task against a remote worker and streams its text output.
///
/// Implementations fail with [`WorkerError::Timeout`] when `timeout` elapses
/// and with [`WorkerError::Execution`] for anything they cannot classify.
/// Returning [`WorkerError::Retryable`] opts a failure into retry.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Starts executing `prompt` and returns the output stream.
    async fn execute(&self, prompt: &str, timeout: Duration) -> Result<TextStream, WorkerError>;
}
