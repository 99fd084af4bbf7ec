//! Read-only status views for monitoring endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use photobatch_core::config::batch::BatchConfig;
use photobatch_core::types::BatchId;

use super::progress::FailedJobSummary;
use crate::job::{Job, JobStatus};

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    /// All jobs held.
    pub total: usize,
    /// Jobs waiting to run.
    pub queued: usize,
    /// Jobs currently being attempted.
    pub processing: usize,
    /// Jobs that completed.
    pub completed: usize,
    /// Jobs that exhausted their attempts.
    pub failed: usize,
}

impl StatusCounts {
    /// Tally the statuses of a job list.
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            counts.total += 1;
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Jobs that have settled.
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

/// Point-in-time status of a batch processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    /// Most recent batch identifier.
    pub batch_id: Option<BatchId>,
    /// Name given at the most recent submission.
    pub name: Option<String>,
    /// Whether a run is processing and has not been asked to pause.
    pub is_processing: bool,
    /// Whether a run loop is still alive. Stays `true` after `pause` until
    /// the job in flight settles; no new run can start while it is set.
    pub is_active: bool,
    /// Job counts by status.
    pub counts: StatusCounts,
    /// Completed counter of the current run.
    pub processed: usize,
    /// Failed counter of the current run.
    pub failed: usize,
    /// `round((completed + failed) / total * 100)`.
    pub progress_percent: u8,
    /// Job being attempted, if any.
    pub current_job: Option<Job>,
    /// When processing first started.
    pub started_at: Option<DateTime<Utc>>,
    /// Linear estimate of when the remaining queued jobs will be done.
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Full listing of a batch processor's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDetails {
    /// Most recent batch identifier.
    pub batch_id: Option<BatchId>,
    /// Name given at the most recent submission.
    pub name: Option<String>,
    /// Whether a run loop is active.
    pub is_processing: bool,
    /// Every job in execution order.
    pub jobs: Vec<Job>,
    /// Jobs that exhausted their attempts in the current run.
    pub failed_jobs: Vec<FailedJobSummary>,
    /// Policy in effect.
    pub config: BatchConfig,
}
