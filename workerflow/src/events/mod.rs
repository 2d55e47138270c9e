//! Event sinks for breaker and worker observability.
//!
//! Breakers report their state transitions and pipelines report task
//! lifecycle through an injected [`EventSink`]. There is no process-wide sink;
//! each breaker and pipeline holds its own handle.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Breaker moved from closed or half-open to open.
pub const BREAKER_OPENED: &str = "breaker.opened";
/// Breaker admitted a probe after its cooldown.
pub const BREAKER_HALF_OPENED: &str = "breaker.half_opened";
/// Breaker recovered.
pub const BREAKER_CLOSED: &str = "breaker.closed";
/// Breaker was reset administratively.
pub const BREAKER_RESET: &str = "breaker.reset";

/// A task passed validation and is about to call its target.
pub const WORKER_STARTED: &str = "worker.started";
/// The target produced its first chunk.
pub const WORKER_FIRST_CHUNK: &str = "worker.first_chunk";
/// A buffered task completed.
pub const WORKER_COMPLETED: &str = "worker.completed";
/// A task ended with an error.
pub const WORKER_FAILED: &str = "worker.failed";
/// A buffered task was cancelled.
pub const WORKER_CANCELLED: &str = "worker.cancelled";
