//! Job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use photobatch_core::types::{BatchId, JobId};

use super::descriptor::JobDescriptor;
use super::status::JobStatus;

/// Job type assigned when a descriptor does not name one.
pub const DEFAULT_JOB_TYPE: &str = "image_analysis";

/// Keys owned by the job record itself. Attributes with these names would
/// collide with the record's own fields and are dropped on submission.
const RESERVED_KEYS: &[&str] = &[
    "id",
    "batchId",
    "type",
    "payload",
    "status",
    "attempts",
    "lastError",
    "result",
    "startedAt",
    "finishedAt",
    "durationMs",
];

/// Details of the most recent failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Error message reported by the processor.
    pub message: String,
    /// Attempt number (1-based) that produced the error.
    pub attempt: u32,
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
}

/// A job tracked by a batch processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Batch this job was submitted with.
    pub batch_id: BatchId,
    /// Processor key.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque processor input.
    pub payload: Value,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Last failure, cleared on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobFailure>,
    /// Processor output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Start of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Duration of the latest attempt in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Caller-supplied pass-through metadata.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Job {
    /// Build a queued job from a descriptor, filling in defaults.
    pub fn from_descriptor(descriptor: JobDescriptor, batch_id: BatchId) -> Self {
        let JobDescriptor {
            id,
            job_type,
            payload,
            mut attributes,
        } = descriptor;

        attributes.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));

        Self {
            id: id.unwrap_or_else(JobId::generate),
            batch_id,
            job_type: job_type.unwrap_or_else(|| DEFAULT_JOB_TYPE.to_string()),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            result: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            attributes,
        }
    }

    /// Look up a pass-through attribute.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Mark the start of a new attempt and return its number.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> u32 {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.started_at = Some(now);
        self.finished_at = None;
        self.duration_ms = None;
        self.attempts
    }

    /// Record a successful attempt.
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.last_error = None;
        self.finish_timing(now);
    }

    /// Record a failed attempt. The status is left as is; the caller decides
    /// whether the job is retried or marked failed.
    pub fn record_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.last_error = Some(JobFailure {
            message: message.into(),
            attempt: self.attempts,
            timestamp: now,
        });
        self.finish_timing(now);
    }

    /// Mark the job as having exhausted its attempts.
    pub fn fail(&mut self) {
        self.status = JobStatus::Failed;
    }

    /// Return the job to the queue as if it had never been attempted.
    pub fn reset(&mut self) {
        self.status = JobStatus::Queued;
        self.attempts = 0;
        self.last_error = None;
        self.result = None;
        self.started_at = None;
        self.finished_at = None;
        self.duration_ms = None;
    }

    /// Put an interrupted attempt back in the queue without counting it.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Queued;
        self.attempts = self.attempts.saturating_sub(1);
        self.started_at = None;
    }

    fn finish_timing(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
    }
}
