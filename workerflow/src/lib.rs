//! # Workerflow
//!
//! Resilient dispatch of tasks to remote, streaming worker agents.
//!
//! Workerflow keeps callers responsive and protects slow or failing workers
//! with:
//!
//! - **Circuit breaking**: per-target admission control with a single
//!   half-open probe
//! - **Streaming-aware retry**: exponential backoff with jitter that never
//!   replays output a caller has already received
//! - **A worker execution pipeline**: validation, preconditions, breaker,
//!   retry and timeouts around one streaming call, with a closed error
//!   taxonomy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use workerflow::prelude::*;
//!
//! let config = WorkerConfig::from_json_str(&std::fs::read_to_string("workers.json")?)?;
//! let registry = Arc::new(BreakerRegistry::from_config(&config, Arc::new(LoggingEventSink::default()))?);
//!
//! let pipeline = WorkerExecutionPipeline::from_config("gpu-1", &config, &registry, client)?;
//!
//! let mut stream = pipeline.execute(&Task::new("Summarize the incident", "gpu-1"));
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod retry;
pub mod testing;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{
        BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitMode, CircuitState,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{TargetConfig, WorkerConfig};
    pub use crate::core::{Task, TaskResult, TaskStatus};
    pub use crate::errors::{ConfigError, ErrorKind, WorkerError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::retry::{RetryConfig, RetryPolicy};
    pub use crate::worker::{
        AgentClient, PreconditionCheck, ResultConsumer, ResultPostProcessor, TextStream,
        WorkerExecutionPipeline,
    };
    pub use futures::StreamExt;
    pub use std::sync::Arc;
}
