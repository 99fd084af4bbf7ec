//! Batch-level views over a set of jobs.

pub mod progress;
pub mod status;

pub use progress::{BatchSummary, FailedJobSummary, ProgressSnapshot, SubmitReceipt, progress_percent};
pub use status::{BatchStatus, QueueDetails, StatusCounts};
