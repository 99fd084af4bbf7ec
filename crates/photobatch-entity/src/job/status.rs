//! Job status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
///
/// `Queued -> Processing -> {Completed | Failed}`. Only an explicit retry of
/// failed jobs moves a job back to `Queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the run loop to reach it.
    #[default]
    Queued,
    /// Currently being attempted.
    Processing,
    /// Finished successfully. Terminal.
    Completed,
    /// Exhausted its attempts.
    Failed,
}

impl JobStatus {
    /// Whether the job has settled for the current run.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
