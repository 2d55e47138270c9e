//! Testing utilities for worker pipelines.
//!
//! This module provides:
//! - Scripted agent clients
//! - Fixtures wiring a pipeline to a breaker and an event collector
//! - Assertions for task results and worker errors

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_result_completed, assert_result_failed, assert_worker_failed};
pub use fixtures::{fast_retry, test_task, TestFixture, TEST_TARGET};
pub use mocks::{ScriptedAgentClient, Step};
