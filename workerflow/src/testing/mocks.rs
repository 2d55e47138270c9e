//! Mock agent clients for testing.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::errors::WorkerError;
use crate::worker::{AgentClient, TextStream};

/// What a [`ScriptedAgentClient`] does on one invocation.
#[derive(Debug, Clone)]
pub enum Step {
    /// Fails before returning a stream.
    Fail(WorkerError),
    /// Streams the chunks, then ends with the error if one is given.
    Stream {
        /// Chunks yielded in order.
        chunks: Vec<String>,
        /// Error yielded after the chunks.
        then: Option<WorkerError>,
    },
    /// Streams the chunks, then never yields again.
    Hang {
        /// Chunks yielded before hanging.
        chunks: Vec<String>,
    },
}

/// An agent client that replays a script, one step per invocation.
///
/// The last step repeats once the script is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedAgentClient {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    prompts: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Duration>>,
    chunk_delay: Option<Duration>,
}

impl ScriptedAgentClient {
    /// Creates a client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Appends a successful stream of `chunks`.
    #[must_use]
    pub fn then_stream<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Step::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: None,
        })
    }

    /// Appends a stream of `chunks` that ends with `err`.
    #[must_use]
    pub fn then_stream_error<I, S>(self, chunks: I, err: WorkerError) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Step::Stream {
            chunks: chunks.into_iter().map(Into::into).collect(),
            then: Some(err),
        })
    }

    /// Appends a failure before any output.
    #[must_use]
    pub fn then_fail(self, err: WorkerError) -> Self {
        self.then(Step::Fail(err))
    }

    /// Appends a stream of `chunks` that then stalls forever.
    #[must_use]
    pub fn then_hang<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Step::Hang {
            chunks: chunks.into_iter().map(Into::into).collect(),
        })
    }

    /// Sleeps before every chunk.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Returns the prompts received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Returns the timeouts received, in order.
    #[must_use]
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }

    fn next_step(&self) -> Step {
        let next = self.steps.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(step) = next {
            *last = Some(step.clone());
            return step;
        }
        last.clone()
            .unwrap_or_else(|| Step::Fail(WorkerError::execution("script exhausted")))
    }

    fn delayed(&self, chunks: Vec<String>) -> TextStream {
        let delay = self.chunk_delay;
        stream::iter(chunks)
            .then(move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, WorkerError>(chunk)
            })
            .boxed()
    }
}

#[async_trait]
impl AgentClient for ScriptedAgentClient {
    async fn execute(&self, prompt: &str, timeout: Duration) -> Result<TextStream, WorkerError> {
        self.prompts.lock().push(prompt.to_string());
        self.timeouts.lock().push(timeout);

        match self.next_step() {
            Step::Fail(err) => Err(err),
            Step::Stream { chunks, then } => {
                let tail = stream::iter(then.map(Err));
                Ok(self.delayed(chunks).chain(tail).boxed())
            }
            Step::Hang { chunks } => Ok(self.delayed(chunks).chain(stream::pending()).boxed()),
        }
    }
}
