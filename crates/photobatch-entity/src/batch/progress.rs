//! Progress notifications and run summaries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use photobatch_core::types::{BatchId, JobId};

use crate::job::Job;

/// Percentage of `settled` over `total`, rounded half up. Zero when empty.
pub fn progress_percent(settled: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (settled * 200 + total) / (total * 2);
    pct.min(100) as u8
}

/// Returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Identifier of the batch the jobs joined.
    pub batch_id: BatchId,
    /// Jobs added by this submission.
    pub job_count: usize,
    /// Jobs held by the processor after the submission.
    pub total_queued: usize,
}

/// Summary entry for a job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobSummary {
    /// Job identifier.
    pub id: JobId,
    /// Final error message.
    pub error: String,
    /// Attempts made.
    pub attempts: u32,
    /// Pass-through metadata of the job, e.g. a display name.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl FailedJobSummary {
    /// Summarise a failed job.
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            error: job
                .last_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            attempts: job.attempts,
            attributes: job.attributes.clone(),
        }
    }
}

/// Emitted each time a job settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// 1-based position of the settled job in the batch.
    pub current: usize,
    /// Jobs in the batch.
    pub total: usize,
    /// Jobs completed so far.
    pub processed: usize,
    /// Jobs failed so far.
    pub failed: usize,
    /// Copy of the job that just settled.
    pub current_job: Job,
    /// Batch being processed.
    pub batch_id: Option<BatchId>,
    /// `round((processed + failed) / total * 100)`.
    pub progress_percent: u8,
}

/// Emitted once when a run loop exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Batch that was processed.
    pub batch_id: Option<BatchId>,
    /// Jobs in the batch.
    pub total: usize,
    /// Jobs completed.
    pub processed: usize,
    /// Jobs failed.
    pub failed: usize,
    /// Details of every failed job.
    pub failed_jobs: Vec<FailedJobSummary>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl BatchSummary {
    /// Whether every job in the batch has completed.
    pub fn is_fully_successful(&self) -> bool {
        self.failed == 0 && self.processed == self.total
    }
}
