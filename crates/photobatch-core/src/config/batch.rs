//! Batch execution policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Execution policy for a batch processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of jobs allowed in flight. The run loop is single-flight,
    /// values above 1 are accepted but not acted on.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Total attempts per job before it is marked failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Pause between attempts of the same job, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Pause between successive jobs, in milliseconds.
    #[serde(default = "default_inter_job_delay")]
    pub inter_job_delay_ms: u64,
    /// Maximum number of jobs accepted by a single submission.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Upper bound on a single processor attempt, in milliseconds.
    /// `None` lets an attempt run for as long as the processor takes.
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            inter_job_delay_ms: default_inter_job_delay(),
            max_batch_size: default_max_batch_size(),
            job_timeout_ms: None,
        }
    }
}

impl BatchConfig {
    /// Delay between retries of the same job.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay between successive jobs.
    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_millis(self.inter_job_delay_ms)
    }

    /// Per-attempt timeout, if one is configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    /// Shallow-merge the supplied keys over this configuration.
    pub fn merge(&mut self, overrides: BatchConfigOverrides) {
        if let Some(v) = overrides.concurrency {
            self.concurrency = v;
        }
        if let Some(v) = overrides.retry_attempts {
            self.retry_attempts = v;
        }
        if let Some(v) = overrides.retry_delay_ms {
            self.retry_delay_ms = v;
        }
        if let Some(v) = overrides.inter_job_delay_ms {
            self.inter_job_delay_ms = v;
        }
        if let Some(v) = overrides.max_batch_size {
            self.max_batch_size = v;
        }
        if let Some(v) = overrides.job_timeout_ms {
            self.job_timeout_ms = Some(v);
        }
    }

    /// Reject values the run loop cannot operate with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::configuration("concurrency must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(AppError::configuration("retry_attempts must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(AppError::configuration("max_batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Partial [`BatchConfig`]; only the keys that are `Some` are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfigOverrides {
    /// See [`BatchConfig::concurrency`].
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// See [`BatchConfig::retry_attempts`].
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    /// See [`BatchConfig::retry_delay_ms`].
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    /// See [`BatchConfig::inter_job_delay_ms`].
    #[serde(default)]
    pub inter_job_delay_ms: Option<u64>,
    /// See [`BatchConfig::max_batch_size`].
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    /// See [`BatchConfig::job_timeout_ms`].
    #[serde(default)]
    pub job_timeout_ms: Option<u64>,
}

fn default_concurrency() -> usize {
    1
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_inter_job_delay() -> u64 {
    1000
}

fn default_max_batch_size() -> usize {
    100
}
