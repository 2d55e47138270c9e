//! Test assertions for task results and worker errors.

use crate::core::{TaskResult, TaskStatus};
use crate::errors::{ErrorKind, WorkerError};

/// Asserts that the result completed.
pub fn assert_result_completed(result: &TaskResult) {
    assert!(
        result.is_success(),
        "Expected completed, got status: {:?} ({:?})",
        result.status,
        result.error
    );
}

/// Asserts that the result failed with an error of `kind`.
pub fn assert_result_failed(result: &TaskResult, kind: ErrorKind) {
    assert_eq!(
        result.status,
        TaskStatus::Failed,
        "Expected failure, got status: {:?}",
        result.status
    );
    assert_eq!(
        result.error_kind,
        Some(kind),
        "Expected error kind {kind}, got {:?}",
        result.error_kind
    );
    assert!(
        result.error.as_deref().is_some_and(|e| !e.is_empty()),
        "Expected a non-empty error message"
    );
}

/// Asserts that `err` is a terminal worker failure caused by `cause`.
pub fn assert_worker_failed(err: &WorkerError, cause: ErrorKind) {
    match err {
        WorkerError::WorkerExecutionFailed { cause: inner, .. } => assert_eq!(
            inner.kind(),
            cause,
            "Expected cause {cause}, got {}",
            inner.kind()
        ),
        other => panic!("Expected WorkerExecutionFailed, got {other:?}"),
    }
}
