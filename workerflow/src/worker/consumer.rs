//! Downstream consumers of buffered task results.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::TaskResult;

/// Receives every result produced by the buffering entry points.
#[async_trait]
pub trait ResultConsumer: Send + Sync {
    /// Handles one result. Must not fail the pipeline.
    async fn consume(&self, result: &TaskResult);
}

/// Logs each result with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResultConsumer;

#[async_trait]
impl ResultConsumer for LoggingResultConsumer {
    async fn consume(&self, result: &TaskResult) {
        if result.is_success() {
            info!(
                task_id = %result.task.id,
                target = %result.task.target_name,
                status = %result.status,
                duration_ms = result.duration_ms(),
                output_len = result.output.len(),
                "Task result"
            );
        } else {
            warn!(
                task_id = %result.task.id,
                target = %result.task.target_name,
                status = %result.status,
                error = result.error.as_deref().unwrap_or_default(),
                "Task result"
            );
        }
    }
}

/// Keeps every result in memory.
#[derive(Debug, Default)]
pub struct CollectingResultConsumer {
    results: Mutex<Vec<TaskResult>>,
}

impl CollectingResultConsumer {
    /// Creates an empty consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected results, oldest first.
    #[must_use]
    pub fn results(&self) -> Vec<TaskResult> {
        self.results.lock().clone()
    }

    /// Returns the number of collected results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl ResultConsumer for CollectingResultConsumer {
    async fn consume(&self, result: &TaskResult) {
        self.results.lock().push(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Task, TaskStatus};
    use crate::errors::ErrorKind;
    use chrono::Utc;

    #[tokio::test]
    async fn test_collecting_consumer() {
        let consumer = CollectingResultConsumer::new();
        assert!(consumer.is_empty());

        let task = Task::new("summarize", "gpu-1");
        consumer
            .consume(&TaskResult::completed(task.clone(), "ok".into(), Utc::now()))
            .await;
        consumer
            .consume(&TaskResult::failed(task, String::new(), "boom", ErrorKind::Execution, Utc::now()))
            .await;

        let results = consumer.results();
        assert_eq!(consumer.len(), 2);
        assert_eq!(results[0].status, TaskStatus::Completed);
        assert_eq!(results[1].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_logging_consumer_accepts_results() {
        let task = Task::new("summarize", "gpu-1");
        LoggingResultConsumer
            .consume(&TaskResult::cancelled(task, String::new(), "stopped", Utc::now()))
            .await;
    }
}
