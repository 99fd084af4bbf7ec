//! Job processors and the registry that dispatches jobs to them by type.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use photobatch_core::error::AppError;
use photobatch_entity::job::Job;

/// Performs the actual work for one job type.
///
/// Implementations are awaited to completion; the run loop never aborts a
/// call in progress unless a per-job timeout is configured.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Process a job's payload and return its result.
    async fn process(&self, payload: &Value, job: &Job) -> Result<Value, JobExecutionError>;
}

/// Error from a single processing attempt. Every variant counts as a
/// failed attempt and is subject to retry.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The processor reported a failure.
    #[error("{0}")]
    Failed(String),

    /// No processor is registered for the job's type.
    #[error("No processor registered for job type '{0}'")]
    UnknownJobType(String),

    /// The attempt exceeded the configured per-job timeout.
    #[error("Attempt timed out after {0:?}")]
    TimedOut(Duration),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl JobExecutionError {
    /// Create a processor failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<anyhow::Error> for JobExecutionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// Adapts an async closure into a [`JobProcessor`].
pub struct FnProcessor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(Value, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobExecutionError>> + Send + 'static,
{
    async fn process(&self, payload: &Value, job: &Job) -> Result<Value, JobExecutionError> {
        (self.f)(payload.clone(), job.clone()).await
    }
}

/// Wrap an async closure `(payload, job) -> Result<Value, JobExecutionError>`
/// as a shareable processor.
pub fn processor_fn<F, Fut>(f: F) -> Arc<dyn JobProcessor>
where
    F: Fn(Value, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobExecutionError>> + Send + 'static,
{
    Arc::new(FnProcessor { f })
}

/// Maps job type keys to processors.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, replacing any previous one for the same type.
    pub fn register(&mut self, job_type: impl Into<String>, processor: Arc<dyn JobProcessor>) {
        let job_type = job_type.into();
        tracing::debug!("Registered processor for job type '{}'", job_type);
        self.processors.insert(job_type, processor);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, job_type: impl Into<String>, processor: Arc<dyn JobProcessor>) -> Self {
        self.register(job_type, processor);
        self
    }

    /// Look up the processor for a job type.
    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn JobProcessor>> {
        self.processors.get(job_type)
    }

    /// Check if a processor is registered for a job type.
    pub fn has_processor(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}
