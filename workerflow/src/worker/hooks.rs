//! Caller-supplied extension points for the pipeline.

use async_trait::async_trait;

use crate::core::{Task, TaskResult};

/// Decides whether a validated task may run.
#[async_trait]
pub trait PreconditionCheck: Send + Sync {
    /// Returns the rejection reason if the task must not run.
    async fn check(&self, task: &Task) -> Result<(), String>;
}

/// Admits every task.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PreconditionCheck for AllowAll {
    async fn check(&self, _task: &Task) -> Result<(), String> {
        Ok(())
    }
}

/// Adapts a synchronous closure into a [`PreconditionCheck`].
pub struct FnPrecondition<F> {
    check: F,
}

impl<F> FnPrecondition<F>
where
    F: Fn(&Task) -> Result<(), String> + Send + Sync,
{
    /// Wraps `check`.
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> std::fmt::Debug for FnPrecondition<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPrecondition").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> PreconditionCheck for FnPrecondition<F>
where
    F: Fn(&Task) -> Result<(), String> + Send + Sync,
{
    async fn check(&self, task: &Task) -> Result<(), String> {
        (self.check)(task)
    }
}

/// Transforms a successful result before it is returned.
#[async_trait]
pub trait ResultPostProcessor: Send + Sync {
    /// Returns the result to hand back to the caller.
    async fn process(&self, result: TaskResult) -> TaskResult;
}

/// Returns results unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPostProcessor;

#[async_trait]
impl ResultPostProcessor for IdentityPostProcessor {
    async fn process(&self, result: TaskResult) -> TaskResult {
        result
    }
}
