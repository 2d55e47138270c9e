//! Core domain model types for workerflow.
//!
//! This module contains:
//! - Task status enum
//! - Task and task result types

mod status;
mod task;

pub use status::TaskStatus;
pub use task::{Task, TaskResult};
