//! Tasks and their terminal results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::TaskStatus;
use crate::errors::ErrorKind;

/// A unit of work submitted to a worker pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// What the worker should do. Sent to the agent client as the prompt.
    pub description: String,
    /// Name of the target this task must run against.
    pub target_name: String,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// Current status. Only the buffering entry points change it.
    pub status: TaskStatus,
}

impl Task {
    /// Creates a new pending task.
    #[must_use]
    pub fn new(description: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            target_name: target_name.into(),
            created_at: Utc::now(),
            status: TaskStatus::Pending,
        }
    }
}

/// The terminal outcome of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Snapshot of the task as it was when the result was produced.
    pub task: Task,
    /// Final status.
    pub status: TaskStatus,
    /// Concatenated output chunks.
    pub output: String,
    /// Error message if the task did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Kind of the error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution ended.
    pub ended_at: DateTime<Utc>,
}

impl TaskResult {
    /// Creates a completed result.
    #[must_use]
    pub fn completed(task: Task, output: String, started_at: DateTime<Utc>) -> Self {
        Self {
            task,
            status: TaskStatus::Completed,
            output,
            error: None,
            error_kind: None,
            metadata: HashMap::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        task: Task,
        output: String,
        error: impl Into<String>,
        kind: ErrorKind,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task,
            status: TaskStatus::Failed,
            output,
            error: Some(error.into()),
            error_kind: Some(kind),
            metadata: HashMap::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Creates a cancelled result carrying whatever output arrived first.
    #[must_use]
    pub fn cancelled(
        task: Task,
        output: String,
        reason: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task,
            status: TaskStatus::Cancelled,
            output,
            error: Some(reason.into()),
            error_kind: None,
            metadata: HashMap::new(),
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64
    }

    /// Returns true if the task completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the task failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed)
    }
}
