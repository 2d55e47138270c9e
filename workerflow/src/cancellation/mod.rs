//! Cooperative cancellation for buffered task execution.

mod token;

pub use token::{CancelCallback, CancellationToken};
