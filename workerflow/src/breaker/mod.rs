//! Circuit breaking for worker targets.
//!
//! This module provides:
//! - The breaker state record and its modes
//! - The breaker itself with admission guards
//! - A registry holding one breaker per target

mod circuit;
mod config;
mod metrics;
mod registry;
mod state;

pub use circuit::{Admission, CircuitBreaker};
pub use config::BreakerConfig;
pub use metrics::{BreakerMetrics, MetricsSnapshot};
pub use registry::BreakerRegistry;
pub use state::{CircuitMode, CircuitState};
