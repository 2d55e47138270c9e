//! Exponential backoff retry for single-shot and streaming operations.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::RetryConfig;
use crate::errors::{millis, ConfigError, WorkerError};

/// Bounded, jittered exponential-backoff retry.
///
/// The policy is immutable and cheap to clone; share one per target.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: Arc<RetryConfig>,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a policy, refusing an invalid config.
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            attempt_timeout: None,
        })
    }

    /// Applies a deadline to each attempt.
    ///
    /// For streaming operations the deadline bounds the wait for each next
    /// chunk of the current attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Returns the config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the per-attempt deadline, if any.
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// The exponential delay after `attempt` (numbered from 1), capped at
    /// `max_delay`, before jitter.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.config
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.config.max_delay)
    }

    /// The delay to sleep after failed `attempt`: the capped delay plus up to
    /// `jitter_fraction` of it.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.config.jitter_fraction <= 0.0 {
            return capped;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.config.jitter_fraction);
        let jitter =
            Duration::try_from_secs_f64(capped.as_secs_f64() * factor).unwrap_or(Duration::MAX);
        capped.saturating_add(jitter)
    }

    /// Returns true if the error's kind is configured as retryable.
    #[must_use]
    pub fn is_retryable(&self, err: &WorkerError) -> bool {
        self.config.retryable_kinds.contains(&err.kind())
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or attempts run out.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, WorkerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        let mut attempt = 1;
        loop {
            let err = match self.bounded(operation()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match self.next_delay(attempt, &err) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            }
            attempt += 1;
        }
    }

    /// Streams the chunks of `operation`, retrying only while no chunk of the
    /// current attempt has been delivered.
    ///
    /// Once an attempt has yielded output, any later error ends the stream
    /// without another attempt. Dropping the returned stream drops the
    /// in-progress attempt or backoff sleep.
    pub fn execute_streaming<F, Fut, S, T>(&self, mut operation: F) -> BoxStream<'static, Result<T, WorkerError>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, WorkerError>> + Send + 'static,
        S: Stream<Item = Result<T, WorkerError>> + Send + Unpin + 'static,
        T: Send + 'static,
    {
        let policy = self.clone();

        async_stream::stream! {
            let mut attempt = 1;
            loop {
                let mut first_chunk_received = false;

                let failure = match policy.bounded(operation()).await {
                    Err(err) => err,
                    Ok(mut chunks) => loop {
                        match policy.next_chunk(&mut chunks).await {
                            Some(Ok(chunk)) => {
                                first_chunk_received = true;
                                yield Ok(chunk);
                            }
                            Some(Err(err)) => break err,
                            None => return,
                        }
                    },
                };

                if first_chunk_received {
                    tracing::debug!(
                        attempt,
                        error = %failure,
                        "Stream failed after output was delivered, not retrying"
                    );
                    yield Err(failure);
                    return;
                }

                match policy.next_delay(attempt, &failure) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        yield Err(failure);
                        return;
                    }
                }
                attempt += 1;
            }
        }
        .boxed()
    }

    /// Decides whether to retry after `attempt` failed with `err`.
    fn next_delay(&self, attempt: u32, err: &WorkerError) -> Option<Duration> {
        if !self.is_retryable(err) {
            return None;
        }
        if attempt >= self.config.max_attempts {
            tracing::warn!(attempts = attempt, error = %err, "Retry attempts exhausted");
            return None;
        }
        let delay = self.delay(attempt);
        tracing::debug!(
            attempt,
            delay_ms = millis(delay),
            error = %err,
            "Retrying after failure"
        );
        Some(delay)
    }

    async fn bounded<Fut, T>(&self, fut: Fut) -> Result<T, WorkerError>
    where
        Fut: Future<Output = Result<T, WorkerError>>,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or_else(|_| Err(WorkerError::timeout(limit))),
            None => fut.await,
        }
    }

    async fn next_chunk<S, T>(&self, chunks: &mut S) -> Option<Result<T, WorkerError>>
    where
        S: Stream<Item = Result<T, WorkerError>> + Unpin,
    {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, chunks.next())
                .await
                .unwrap_or_else(|_| Some(Err(WorkerError::timeout(limit)))),
            None => chunks.next().await,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            config: Arc::new(RetryConfig::default()),
            attempt_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_base_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(100)),
        )
        .unwrap()
    }

    type Chunks = BoxStream<'static, Result<String, WorkerError>>;

    fn chunks(items: Vec<Result<&str, WorkerError>>) -> Chunks {
        stream::iter(
            items
                .into_iter()
                .map(|item| item.map(str::to_string))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(RetryPolicy::new(RetryConfig::new().with_max_attempts(0)).is_err());
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_millis(500))
                .with_jitter_fraction(0.0),
        )
        .unwrap();

        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_only_adds() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(10))
                .with_jitter_fraction(0.5),
        )
        .unwrap();

        for attempt in 1..=6 {
            let floor = policy.capped_delay(attempt);
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= floor);
                assert!(delay <= floor + floor.mul_f64(0.5));
            }
        }
    }

    #[test]
    fn test_jitter_saturates_near_duration_max() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_base_delay(Duration::MAX)
                .with_max_delay(Duration::MAX)
                .with_jitter_fraction(1.0),
        )
        .unwrap();

        for attempt in 1..=4 {
            assert!(policy.delay(attempt) >= policy.capped_delay(attempt));
        }
        assert_eq!(policy.capped_delay(3), Duration::MAX);
    }

    #[test]
    fn test_is_retryable() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&WorkerError::retryable("busy")));
        assert!(policy.is_retryable(&WorkerError::timeout(Duration::from_secs(1))));
        assert!(!policy.is_retryable(&WorkerError::execution("crashed")));
        assert!(!policy.is_retryable(&WorkerError::validation("empty")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result = policy
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WorkerError::retryable("busy"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WorkerError::execution("crashed"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Execution);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(4)
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WorkerError::retryable("busy"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_applies_attempt_timeout() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(2).with_timeout(Duration::from_millis(50));

        let result: Result<(), _> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_retries_before_first_chunk() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let stream = fast_policy(3).execute_streaming(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(WorkerError::retryable("busy"))
                } else {
                    Ok(chunks(vec![Ok("a"), Ok("b")]))
                }
            }
        });

        let output: Vec<_> = stream.collect().await;
        let output: Vec<String> = output.into_iter().map(Result::unwrap).collect();

        assert_eq!(output, vec!["a", "b"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_retries_error_before_any_chunk() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let stream = fast_policy(2).execute_streaming(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(chunks(vec![Err(WorkerError::retryable("warming up"))]))
                } else {
                    Ok(chunks(vec![Ok("ready")]))
                }
            }
        });

        let output: Vec<_> = stream.collect().await;

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].as_deref().unwrap(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_never_retries_after_output() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let stream = fast_policy(3).execute_streaming(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(chunks(vec![
                    Ok("chunk1"),
                    Err(WorkerError::retryable("connection reset")),
                ]))
            }
        });

        let output: Vec<_> = stream.collect().await;

        assert_eq!(output.len(), 2);
        assert_eq!(output[0].as_deref().unwrap(), "chunk1");
        assert_eq!(output[1].as_ref().unwrap_err().kind(), ErrorKind::Retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_exhaustion_yields_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let stream = fast_policy(3).execute_streaming(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<Chunks, _>(WorkerError::timeout(Duration::from_secs(1))) }
        });

        let output: Vec<_> = stream.collect().await;

        assert_eq!(output.len(), 1);
        assert_eq!(output[0].as_ref().unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_chunk_timeout() {
        let policy = fast_policy(1).with_timeout(Duration::from_millis(50));

        let stream = policy.execute_streaming(|| async {
            let slow = stream::once(async { Ok::<_, WorkerError>("a".to_string()) })
                .chain(stream::once(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("b".to_string())
                }));
            Ok(slow.boxed())
        });

        let output: Vec<_> = stream.collect().await;

        assert_eq!(output[0].as_deref().unwrap(), "a");
        assert_eq!(output[1].as_ref().unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut stream = RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(5)
                .with_base_delay(Duration::from_secs(10))
                .with_max_delay(Duration::from_secs(10)),
        )
        .unwrap()
        .execute_streaming(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<Chunks, _>(WorkerError::retryable("busy")) }
        });

        let poll = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert!(poll.is_err());
        drop(stream);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
