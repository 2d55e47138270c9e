//! The circuit breaker state machine.
//!
//! ```text
//! Closed   -> Open      failure_count >= failure_threshold
//! Open     -> HalfOpen  on the first check after the cooldown has elapsed
//! HalfOpen -> Closed    success_count >= success_threshold
//! HalfOpen -> Open      on any failure
//! ```
//!
//! All bookkeeping happens under one mutex per breaker. The lock is never held
//! across the protected call or an `.await`; events are emitted after it is
//! released.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BreakerConfig, BreakerMetrics, CircuitMode, CircuitState};
use crate::errors::{ConfigError, WorkerError};
use crate::events::{
    EventSink, NoOpEventSink, BREAKER_CLOSED, BREAKER_HALF_OPENED, BREAKER_OPENED, BREAKER_RESET,
};

/// Admission control and health bookkeeping for one named target.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<CircuitState>,
    metrics: BreakerMetrics,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for `name`.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::default()),
            metrics: BreakerMetrics::new(),
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the sink that receives state transitions.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> &BreakerMetrics {
        &self.metrics
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().clone()
    }

    /// Asks for permission to make one call.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here and
    /// admits this call as its probe. While half-open only one call may be in
    /// flight.
    pub fn check_before_call(&self) -> Result<(), WorkerError> {
        let gate = {
            let mut state = self.state.lock();
            self.gate_locked(&mut state, Instant::now())
        };

        match gate {
            Gate::Admitted { half_opened } => {
                if half_opened {
                    self.transitioned(CircuitMode::Open, CircuitMode::HalfOpen);
                }
                self.metrics.record_admitted();
                Ok(())
            }
            Gate::Rejected { retry_after } => {
                self.metrics.record_rejected();
                debug!(breaker = %self.name, ?retry_after, "Call rejected by open circuit");
                Err(WorkerError::circuit_open(&self.name, retry_after))
            }
        }
    }

    fn gate_locked(&self, state: &mut CircuitState, now: Instant) -> Gate {
        let mut half_opened = false;

        if state.mode == CircuitMode::Open {
            let opened_at = state.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            let cooldown = self.config.timeout();
            if elapsed < cooldown {
                return Gate::Rejected {
                    retry_after: Some(cooldown - elapsed),
                };
            }
            state.mode = CircuitMode::HalfOpen;
            state.success_count = 0;
            state.in_flight = 0;
            half_opened = true;
        }

        if state.mode == CircuitMode::HalfOpen && state.in_flight >= 1 {
            return Gate::Rejected { retry_after: None };
        }

        state.in_flight += 1;
        Gate::Admitted { half_opened }
    }

    /// Like [`check_before_call`](Self::check_before_call), but returns a
    /// guard that gives back the in-flight slot if it is dropped before any
    /// outcome was recorded.
    pub fn admit(self: &Arc<Self>) -> Result<Admission, WorkerError> {
        self.check_before_call()?;
        Ok(Admission {
            breaker: Arc::clone(self),
            settled: false,
        })
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let closed_from = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);

            match state.mode {
                CircuitMode::Closed => {
                    state.failure_count = 0;
                    false
                }
                CircuitMode::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        let last_failure_at = state.last_failure_at;
                        *state = CircuitState {
                            last_failure_at,
                            ..CircuitState::default()
                        };
                        true
                    } else {
                        false
                    }
                }
                CircuitMode::Open => false,
            }
        };

        self.metrics.record_success();
        if closed_from {
            self.transitioned(CircuitMode::HalfOpen, CircuitMode::Closed);
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self, err: &WorkerError) {
        self.fail(err, true);
    }

    /// Records a failure for a call whose in-flight slot was already given
    /// back by an earlier outcome.
    pub fn record_late_failure(&self, err: &WorkerError) {
        self.fail(err, false);
    }

    fn fail(&self, err: &WorkerError, release_slot: bool) {
        let now = Instant::now();
        let opened_from = {
            let mut state = self.state.lock();
            if release_slot {
                state.in_flight = state.in_flight.saturating_sub(1);
            }
            state.last_failure_at = Some(now);

            match state.mode {
                CircuitMode::Closed => {
                    state.failure_count += 1;
                    if state.failure_count >= self.config.failure_threshold {
                        state.mode = CircuitMode::Open;
                        state.opened_at = Some(now);
                        Some(CircuitMode::Closed)
                    } else {
                        None
                    }
                }
                CircuitMode::HalfOpen => {
                    state.mode = CircuitMode::Open;
                    state.opened_at = Some(now);
                    state.success_count = 0;
                    Some(CircuitMode::HalfOpen)
                }
                CircuitMode::Open => None,
            }
        };

        self.metrics.record_failure();
        debug!(breaker = %self.name, error = %err, "Failure recorded");
        if let Some(from) = opened_from {
            self.transitioned(from, CircuitMode::Open);
        }
    }

    /// Gives back an in-flight slot without recording an outcome.
    ///
    /// Used when an admitted call is abandoned before it produced a result.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Runs `operation` under the breaker.
    ///
    /// The original error is returned unchanged after being recorded.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        self.check_before_call()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Forces the breaker closed and clears all counters.
    pub fn reset(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::take(&mut *state).mode
        };

        self.metrics.record_transition();
        info!(breaker = %self.name, from = %previous, "Circuit reset");
        self.events.try_emit(
            BREAKER_RESET,
            Some(serde_json::json!({ "breaker": self.name, "from": previous })),
        );
    }

    /// Remaining cooldown if the breaker is open.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        let state = self.state.lock();
        if state.mode != CircuitMode::Open {
            return None;
        }
        let elapsed = state
            .opened_at
            .map_or(Duration::ZERO, |at| Instant::now().saturating_duration_since(at));
        Some(self.config.timeout().saturating_sub(elapsed))
    }

    fn transitioned(&self, from: CircuitMode, to: CircuitMode) {
        self.metrics.record_transition();

        let event_type = match to {
            CircuitMode::Open => {
                warn!(breaker = %self.name, %from, "Circuit opened");
                BREAKER_OPENED
            }
            CircuitMode::HalfOpen => {
                info!(breaker = %self.name, "Circuit half-open, admitting probe");
                BREAKER_HALF_OPENED
            }
            CircuitMode::Closed => {
                info!(breaker = %self.name, "Circuit closed");
                BREAKER_CLOSED
            }
        };

        self.events.try_emit(
            event_type,
            Some(serde_json::json!({ "breaker": self.name, "from": from, "to": to })),
        );
    }
}

enum Gate {
    Admitted { half_opened: bool },
    Rejected { retry_after: Option<Duration> },
}

/// An admitted call.
///
/// Dropping it without recording an outcome releases the in-flight slot, so a
/// cancelled probe does not keep a half-open breaker blocked.
#[derive(Debug)]
pub struct Admission {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl Admission {
    /// Records a success against the breaker.
    pub fn record_success(&mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Records a failure against the breaker.
    ///
    /// A call that already recorded a success keeps its slot released.
    pub fn record_failure(&mut self, err: &WorkerError) {
        if self.settled {
            self.breaker.record_late_failure(err);
        } else {
            self.settled = true;
            self.breaker.record_failure(err);
        }
    }

    /// Returns true once an outcome has been recorded.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.settled {
            debug!(breaker = %self.breaker.name, "Admitted call abandoned");
            self.breaker.release();
        }
    }
}
