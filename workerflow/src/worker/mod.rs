//! Worker execution.
//!
//! This module provides:
//! - The agent client boundary and its text stream type
//! - Precondition and post-processing hooks
//! - Result consumers
//! - The execution pipeline and its builder

mod builder;
mod client;
mod consumer;
mod hooks;
mod pipeline;


pub use builder::{WorkerPipelineBuilder, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_DESCRIPTION_LENGTH};
pub use client::{AgentClient, TextStream};
pub use consumer::{CollectingResultConsumer, LoggingResultConsumer, ResultConsumer};
pub use hooks::{
    AllowAll, FnPrecondition, IdentityPostProcessor, PreconditionCheck, ResultPostProcessor,
};
pub use pipeline::WorkerExecutionPipeline;
