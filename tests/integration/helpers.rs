//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use photobatch_core::config::BatchConfigOverrides;
use photobatch_core::error::AppError;
use photobatch_entity::batch::{BatchSummary, ProgressSnapshot};
use photobatch_entity::job::{DEFAULT_JOB_TYPE, JobDescriptor};
use photobatch_worker::{
    BatchObserver, BatchProcessor, JobExecutionError, JobProcessor, ProcessorRegistry,
    processor_fn,
};

/// Observer that keeps every notification for later assertions
#[derive(Default)]
pub struct RecordingObserver {
    progress: Mutex<Vec<ProgressSnapshot>>,
    completes: Mutex<Vec<BatchSummary>>,
    errors: Mutex<Vec<AppError>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(&self) -> Vec<ProgressSnapshot> {
        self.progress.lock().expect("lock").clone()
    }

    pub fn completes(&self) -> Vec<BatchSummary> {
        self.completes.lock().expect("lock").clone()
    }

    pub fn errors(&self) -> Vec<AppError> {
        self.errors.lock().expect("lock").clone()
    }
}

impl BatchObserver for RecordingObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.progress.lock().expect("lock").push(snapshot.clone());
    }

    fn on_complete(&self, summary: &BatchSummary) {
        self.completes.lock().expect("lock").push(summary.clone());
    }

    fn on_error(&self, error: &AppError) {
        self.errors.lock().expect("lock").push(error.clone());
    }
}

/// Processor using the production retry/delay defaults
pub fn default_processor() -> BatchProcessor {
    BatchProcessor::default()
}

/// Processor with the given attempt limit and short delays
pub fn fast_processor(retry_attempts: u32) -> BatchProcessor {
    BatchProcessor::with_overrides(BatchConfigOverrides {
        retry_attempts: Some(retry_attempts),
        retry_delay_ms: Some(5),
        inter_job_delay_ms: Some(5),
        ..Default::default()
    })
    .expect("valid config")
}

/// Photo-analysis descriptors with explicit ids and a display name
pub fn photo_jobs(ids: &[&str]) -> Vec<JobDescriptor> {
    ids.iter()
        .map(|id| {
            JobDescriptor::new(json!({
                "photoId": id,
                "imageUrl": format!("https://img.example/{id}.jpg"),
            }))
            .with_id(*id)
            .with_attribute("photoTitle", format!("Photo {id}"))
            .with_attribute("albumId", 42)
        })
        .collect()
}

/// Ordered log of (job id, attempt) pairs seen by a processor
pub type CallLog = Arc<Mutex<Vec<(String, u32)>>>;

/// Processor that fails each listed job id the given number of times before
/// succeeding, recording every call.
pub fn flaky_processor(failures: &[(&str, u32)]) -> (Arc<dyn JobProcessor>, CallLog) {
    let remaining: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(
        failures
            .iter()
            .map(|(id, n)| (id.to_string(), *n))
            .collect(),
    ));
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::clone(&log);

    let processor = processor_fn(move |payload: Value, job| {
        let remaining = Arc::clone(&remaining);
        let calls = Arc::clone(&calls);
        async move {
            calls
                .lock()
                .expect("lock")
                .push((job.id.to_string(), job.attempts));
            let mut remaining = remaining.lock().expect("lock");
            match remaining.get_mut(job.id.as_str()) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(JobExecutionError::failed(format!(
                        "vision API rejected {}",
                        job.id
                    )))
                }
                _ => Ok(json!({"analyzed": payload["photoId"]})),
            }
        }
    });
    (processor, log)
}

/// Processor that succeeds on every job
pub fn succeeding_processor() -> (Arc<dyn JobProcessor>, CallLog) {
    flaky_processor(&[])
}

/// Processor that fails on every job
pub fn failing_processor() -> Arc<dyn JobProcessor> {
    processor_fn(|_, job| async move {
        Err(JobExecutionError::failed(format!(
            "analysis failed for {}",
            job.id
        )))
    })
}

/// Registry with a single `image_analysis` processor
pub fn registry(processor: Arc<dyn JobProcessor>) -> ProcessorRegistry {
    ProcessorRegistry::new().with(DEFAULT_JOB_TYPE, processor)
}

/// Number of calls recorded for a job id
pub fn calls_for(log: &CallLog, id: &str) -> usize {
    log.lock()
        .expect("lock")
        .iter()
        .filter(|(job_id, _)| job_id == id)
        .count()
}
