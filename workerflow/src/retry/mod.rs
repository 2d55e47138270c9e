//! Retry with exponential backoff and jitter.
//!
//! [`RetryPolicy::execute`] wraps a single-shot operation.
//! [`RetryPolicy::execute_streaming`] wraps an operation producing a chunk
//! stream and never replays output the caller has already seen.

mod config;
mod policy;

pub use config::RetryConfig;
pub use policy::RetryPolicy;
