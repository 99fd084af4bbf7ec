//! In-memory job queue and batch counters.
//!
//! [`QueueState`] holds everything the run loop and the operator controls
//! share. It is always accessed under the processor's mutex and never
//! across an await point.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use photobatch_core::config::batch::BatchConfig;
use photobatch_core::error::AppError;
use photobatch_core::types::BatchId;
use photobatch_entity::batch::{
    BatchStatus, BatchSummary, FailedJobSummary, ProgressSnapshot, QueueDetails, StatusCounts,
    SubmitReceipt, progress_percent,
};
use photobatch_entity::job::{Job, JobDescriptor, JobStatus};

use crate::observer::BatchObserver;
use crate::processor::ProcessorRegistry;

/// Registry and observer of the most recent run, reused by `resume`.
#[derive(Clone)]
pub(crate) struct RunHooks {
    pub(crate) processors: ProcessorRegistry,
    pub(crate) observer: Arc<dyn BatchObserver>,
}

/// Mutable state of one batch processor.
pub(crate) struct QueueState {
    pub(crate) config: BatchConfig,
    pub(crate) jobs: Vec<Job>,
    pub(crate) batch_id: Option<BatchId>,
    pub(crate) name: Option<String>,
    /// Completed counter.
    pub(crate) processed: usize,
    /// Failed counter.
    pub(crate) failed: usize,
    pub(crate) failed_jobs: Vec<FailedJobSummary>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    /// Index of the job being attempted.
    pub(crate) current: Option<usize>,
    /// Cleared by `pause`; the loop exits at the next job boundary.
    pub(crate) processing: bool,
    /// True from the start of a run until its loop has exited.
    pub(crate) active: bool,
    /// Bumped by every run start and by `cancel`; a loop whose epoch no
    /// longer matches must not touch the state.
    pub(crate) epoch: u64,
    pub(crate) hooks: Option<RunHooks>,
}

impl QueueState {
    pub(crate) fn new(config: BatchConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
            batch_id: None,
            name: None,
            processed: 0,
            failed: 0,
            failed_jobs: Vec::new(),
            started_at: None,
            current: None,
            processing: false,
            active: false,
            epoch: 0,
            hooks: None,
        }
    }

    /// Validate and append a submission under a fresh batch id.
    pub(crate) fn submit(
        &mut self,
        descriptors: Vec<JobDescriptor>,
        name: Option<&str>,
    ) -> Result<SubmitReceipt, AppError> {
        if descriptors.is_empty() {
            return Err(AppError::invalid_input("Jobs must be a non-empty list"));
        }
        if descriptors.len() > self.config.max_batch_size {
            return Err(AppError::invalid_input(format!(
                "Batch of {} jobs exceeds the maximum of {}",
                descriptors.len(),
                self.config.max_batch_size
            )));
        }

        let batch_id = BatchId::new();
        let job_count = descriptors.len();
        self.jobs.extend(
            descriptors
                .into_iter()
                .map(|descriptor| Job::from_descriptor(descriptor, batch_id)),
        );
        self.batch_id = Some(batch_id);
        self.name = name.map(str::to_string);

        Ok(SubmitReceipt {
            batch_id,
            job_count,
            total_queued: self.jobs.len(),
        })
    }

    /// First queued job in insertion order.
    pub(crate) fn next_queued(&self) -> Option<usize> {
        self.next_queued_from(0)
    }

    /// First queued job at or after `start`.
    pub(crate) fn next_queued_from(&self, start: usize) -> Option<usize> {
        self.jobs
            .iter()
            .skip(start)
            .position(|j| j.status == JobStatus::Queued)
            .map(|offset| start + offset)
    }

    pub(crate) fn has_queued(&self) -> bool {
        self.next_queued().is_some()
    }

    pub(crate) fn progress(&self, index: usize) -> Option<ProgressSnapshot> {
        let job = self.jobs.get(index)?;
        Some(ProgressSnapshot {
            current: index + 1,
            total: self.jobs.len(),
            processed: self.processed,
            failed: self.failed,
            current_job: job.clone(),
            batch_id: self.batch_id,
            progress_percent: progress_percent(self.processed + self.failed, self.jobs.len()),
        })
    }

    pub(crate) fn summary(&self, run_started: DateTime<Utc>, now: DateTime<Utc>) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id,
            total: self.jobs.len(),
            processed: self.processed,
            failed: self.failed,
            failed_jobs: self.failed_jobs.clone(),
            duration_ms: elapsed_ms(run_started, now),
        }
    }

    pub(crate) fn status(&self, now: DateTime<Utc>) -> BatchStatus {
        let counts = StatusCounts::tally(&self.jobs);
        BatchStatus {
            batch_id: self.batch_id,
            name: self.name.clone(),
            is_processing: self.processing,
            is_active: self.active,
            counts,
            processed: self.processed,
            failed: self.failed,
            progress_percent: progress_percent(counts.settled(), counts.total),
            current_job: self.current.and_then(|i| self.jobs.get(i)).cloned(),
            started_at: self.started_at,
            estimated_completion: self.estimate_completion(counts.queued, now),
        }
    }

    /// `now + queued * (elapsed / settled)`; only while processing and once
    /// at least one job has settled.
    fn estimate_completion(&self, queued: usize, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.processing {
            return None;
        }
        let settled = (self.processed + self.failed) as i64;
        if settled == 0 {
            return None;
        }
        let elapsed = (now - self.started_at?).num_milliseconds().max(0);
        let average = elapsed / settled;
        Some(now + TimeDelta::milliseconds(average * queued as i64))
    }

    pub(crate) fn details(&self) -> QueueDetails {
        QueueDetails {
            batch_id: self.batch_id,
            name: self.name.clone(),
            is_processing: self.processing,
            jobs: self.jobs.clone(),
            failed_jobs: self.failed_jobs.clone(),
            config: self.config.clone(),
        }
    }

    /// Reset every failed job to queued and clear the failure tally.
    pub(crate) fn retry_failed(&mut self) -> usize {
        let mut count = 0;
        for job in self.jobs.iter_mut().filter(|j| j.status == JobStatus::Failed) {
            job.reset();
            count += 1;
        }
        self.failed = 0;
        self.failed_jobs.clear();
        count
    }

    /// Drop every job and counter and detach any running loop.
    pub(crate) fn clear(&mut self) {
        self.processing = false;
        self.active = false;
        self.current = None;
        self.jobs.clear();
        self.batch_id = None;
        self.name = None;
        self.processed = 0;
        self.failed = 0;
        self.failed_jobs.clear();
        self.started_at = None;
        self.epoch += 1;
    }
}

pub(crate) fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
