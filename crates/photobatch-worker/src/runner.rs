//! Batch processor that owns one batch and drives it through the run loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time;

use photobatch_core::config::batch::{BatchConfig, BatchConfigOverrides};
use photobatch_core::error::AppError;
use photobatch_core::result::AppResult;
use photobatch_core::types::BatchId;
use photobatch_entity::batch::{
    BatchStatus, BatchSummary, FailedJobSummary, ProgressSnapshot, QueueDetails, SubmitReceipt,
};
use photobatch_entity::job::{DEFAULT_JOB_TYPE, Job, JobDescriptor};

use crate::observer::BatchObserver;
use crate::processor::{JobExecutionError, JobProcessor, ProcessorRegistry};
use crate::queue::{QueueState, RunHooks, elapsed_ms};

/// Sequential, rate-limited executor for one batch of jobs.
///
/// Cloning yields another handle to the same batch, so operator controls
/// (`pause`, `cancel`, ...) can be invoked from any task while a run is in
/// progress. At most one job is attempted at a time.
#[derive(Clone)]
pub struct BatchProcessor {
    state: Arc<Mutex<QueueState>>,
}

/// Everything a run loop needs that does not live in the shared state.
struct RunContext {
    epoch: u64,
    batch_id: Option<BatchId>,
    started: DateTime<Utc>,
    hooks: RunHooks,
}

/// What the loop does at a job boundary.
enum Next {
    Job(usize, BatchConfig),
    Stop,
    Detached,
}

/// How one job's attempts ended.
enum Settlement {
    /// The job completed or exhausted its attempts.
    Settled(Option<ProgressSnapshot>),
    /// The batch was cancelled while the job was in flight.
    Detached,
}

impl BatchProcessor {
    /// Create a processor with the given policy.
    pub fn new(config: BatchConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(Mutex::new(QueueState::new(config))),
        })
    }

    /// Create a processor from the default policy with some keys replaced.
    pub fn with_overrides(overrides: BatchConfigOverrides) -> AppResult<Self> {
        let mut config = BatchConfig::default();
        config.merge(overrides);
        Self::new(config)
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Policy currently in effect.
    pub fn config(&self) -> BatchConfig {
        self.state().config.clone()
    }

    /// Merge new policy keys over the current ones. A running loop picks
    /// the change up at its next job boundary.
    pub fn update_config(&self, overrides: BatchConfigOverrides) -> AppResult<BatchConfig> {
        let mut state = self.state();
        let mut config = state.config.clone();
        config.merge(overrides);
        config.validate()?;
        state.config = config.clone();
        tracing::debug!("Batch config updated: {:?}", config);
        Ok(config)
    }

    /// Submit job descriptors. They are appended to whatever is already
    /// queued and stamped with a fresh batch id.
    pub fn add_batch(
        &self,
        jobs: Vec<JobDescriptor>,
        name: Option<&str>,
    ) -> AppResult<SubmitReceipt> {
        let receipt = self.state().submit(jobs, name)?;
        tracing::info!(
            "Batch {} submitted{}: {} jobs, {} total queued",
            receipt.batch_id,
            name.map(|n| format!(" ('{n}')")).unwrap_or_default(),
            receipt.job_count,
            receipt.total_queued
        );
        Ok(receipt)
    }

    /// Run the queue to completion (or until paused) on the current task.
    ///
    /// Fails immediately, without touching any state, when a run is already
    /// active, the queue is empty, or no `image_analysis` processor is
    /// supplied. Job failures never surface here; they are reported through
    /// the observer and the returned summary. An `Err` after the run has
    /// started means an infrastructure fault, already reported to
    /// [`BatchObserver::on_error`].
    pub async fn start_processing(
        &self,
        processors: ProcessorRegistry,
        observer: Arc<dyn BatchObserver>,
    ) -> AppResult<BatchSummary> {
        let run = self.begin_run(RunHooks {
            processors,
            observer,
        })?;
        self.clone().drive(run).await
    }

    /// Like [`start_processing`](Self::start_processing) but runs the loop
    /// on a spawned task. Precondition failures are still reported directly.
    pub fn spawn_processing(
        &self,
        processors: ProcessorRegistry,
        observer: Arc<dyn BatchObserver>,
    ) -> AppResult<JoinHandle<AppResult<BatchSummary>>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::internal(format!("No tokio runtime to spawn on: {e}")))?;
        let run = self.begin_run(RunHooks {
            processors,
            observer,
        })?;
        Ok(handle.spawn(self.clone().drive(run)))
    }

    /// Stop at the next job boundary. Returns whether a running loop was
    /// asked to stop.
    pub fn pause(&self) -> bool {
        let mut state = self.state();
        if !state.processing {
            return false;
        }
        state.processing = false;
        tracing::info!("Batch processing paused");
        true
    }

    /// Restart a paused or interrupted batch in the background with the
    /// processors and observer of the previous run.
    ///
    /// Returns `false` when a loop is still active, nothing is queued, no
    /// run was ever started, or there is no tokio runtime.
    pub fn resume(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Cannot resume batch processing outside a tokio runtime");
            return false;
        };

        let hooks = {
            let state = self.state();
            if state.active || !state.has_queued() {
                return false;
            }
            match state.hooks.clone() {
                Some(hooks) => hooks,
                None => return false,
            }
        };

        match self.begin_run(hooks) {
            Ok(run) => {
                tracing::info!("Batch processing resumed");
                drop(handle.spawn(self.clone().drive(run)));
                true
            }
            Err(e) => {
                tracing::debug!("Resume rejected: {}", e);
                false
            }
        }
    }

    /// Stop processing and discard every job and counter. Irreversible.
    pub fn cancel(&self) {
        let mut state = self.state();
        let discarded = state.jobs.len();
        state.clear();
        tracing::info!("Batch cancelled, {} jobs discarded", discarded);
    }

    /// Return every failed job to the queue. Does not start processing.
    pub fn retry_failed_jobs(&self) -> usize {
        let count = self.state().retry_failed();
        tracing::info!("{} failed jobs re-queued", count);
        count
    }

    /// Current counts, progress and completion estimate.
    pub fn get_status(&self) -> BatchStatus {
        self.state().status(Utc::now())
    }

    /// Full copy of the queue.
    pub fn get_queue_details(&self) -> QueueDetails {
        self.state().details()
    }

    /// Check preconditions and claim the processor for a new run.
    fn begin_run(&self, hooks: RunHooks) -> AppResult<RunContext> {
        let mut state = self.state();
        if state.active {
            return Err(AppError::already_processing(
                "Batch processing is already in progress",
            ));
        }
        if state.jobs.is_empty() {
            return Err(AppError::empty_queue("No jobs in queue"));
        }
        if !hooks.processors.has_processor(DEFAULT_JOB_TYPE) {
            return Err(AppError::missing_processor(format!(
                "A processor for '{DEFAULT_JOB_TYPE}' is required"
            )));
        }

        let now = Utc::now();
        state.active = true;
        state.processing = true;
        state.epoch += 1;
        if state.started_at.is_none() {
            state.started_at = Some(now);
        }
        state.hooks = Some(hooks.clone());

        if state.config.concurrency > 1 {
            tracing::warn!(
                "concurrency={} requested; jobs are still processed one at a time",
                state.config.concurrency
            );
        }

        tracing::info!(
            "Batch {} processing started: {} jobs, {} queued, processors={:?}",
            state.batch_id.map(|id| id.to_string()).unwrap_or_default(),
            state.jobs.len(),
            state.jobs.iter().filter(|j| !j.status.is_settled()).count(),
            hooks.processors.registered_types()
        );

        Ok(RunContext {
            epoch: state.epoch,
            batch_id: state.batch_id,
            started: now,
            hooks,
        })
    }

    /// The run loop: take the next queued job, attempt it until it
    /// settles, wait out the inter-job delay, repeat.
    ///
    /// The loop only moves forward. Jobs behind it that are re-queued
    /// mid-run wait for the next run; jobs appended later are picked up.
    async fn drive(self, run: RunContext) -> AppResult<BatchSummary> {
        let mut cursor = 0;
        loop {
            let next = {
                let mut state = self.state();
                if state.epoch != run.epoch {
                    Next::Detached
                } else if !state.processing {
                    Next::Stop
                } else {
                    state.current = state.next_queued_from(cursor);
                    match state.current {
                        Some(index) => Next::Job(index, state.config.clone()),
                        None => Next::Stop,
                    }
                }
            };
            let (index, config) = match next {
                Next::Job(index, config) => (index, config),
                Next::Stop => break,
                Next::Detached => return Ok(self.finish_detached(&run)),
            };
            cursor = index + 1;

            let snapshot = match self.settle_job(&run, index, &config).await {
                Ok(Settlement::Settled(snapshot)) => snapshot,
                Ok(Settlement::Detached) => return Ok(self.finish_detached(&run)),
                Err(e) => return Err(self.abort(&run, e)),
            };

            if let Some(snapshot) = snapshot {
                notify("on_progress", || run.hooks.observer.on_progress(&snapshot))
                    .map_err(|e| self.abort(&run, e))?;
            }

            let more = {
                let state = self.state();
                state.epoch == run.epoch
                    && state.processing
                    && state.next_queued_from(cursor).is_some()
            };
            if more && !config.inter_job_delay().is_zero() {
                time::sleep(config.inter_job_delay()).await;
            }
        }

        let summary = {
            let mut state = self.state();
            state.processing = false;
            state.active = false;
            state.current = None;
            state.summary(run.started, Utc::now())
        };

        tracing::info!(
            "Batch {} run finished: {}/{} processed, {} failed in {}ms",
            summary.batch_id.map(|id| id.to_string()).unwrap_or_default(),
            summary.processed,
            summary.total,
            summary.failed,
            summary.duration_ms
        );
        notify("on_complete", || run.hooks.observer.on_complete(&summary))
            .map_err(|e| self.abort(&run, e))?;
        Ok(summary)
    }

    /// Fault path: release the run's claim on the state and report `err`
    /// once through `on_error`.
    fn abort(&self, run: &RunContext, err: AppError) -> AppError {
        {
            let mut state = self.state();
            if state.epoch == run.epoch {
                state.processing = false;
                state.active = false;
                state.current = None;
            }
        }
        tracing::error!("Batch processing aborted: {}", err);
        if let Err(e) = notify("on_error", || run.hooks.observer.on_error(&err)) {
            tracing::error!("{}", e);
        }
        err
    }

    /// Attempt the job at `index` until it completes or runs out of attempts.
    async fn settle_job(
        &self,
        run: &RunContext,
        index: usize,
        config: &BatchConfig,
    ) -> AppResult<Settlement> {
        loop {
            let job = {
                let mut state = self.state();
                if state.epoch != run.epoch {
                    return Ok(Settlement::Detached);
                }
                let job = job_at(&mut state, index)?;
                let attempt_no = job.begin_attempt(Utc::now());
                tracing::info!(
                    "Processing job: id={}, type='{}', attempt={}/{}",
                    job.id,
                    job.job_type,
                    attempt_no,
                    config.retry_attempts
                );
                job.clone()
            };

            let processor = run.hooks.processors.get(&job.job_type);
            let outcome = match attempt(processor, &job, config.job_timeout()).await {
                Ok(outcome) => outcome,
                Err(fault) => {
                    let mut state = self.state();
                    if state.epoch == run.epoch {
                        if let Ok(job) = job_at(&mut state, index) {
                            job.requeue();
                        }
                    }
                    return Err(fault);
                }
            };

            let settled = {
                let mut state = self.state();
                if state.epoch != run.epoch {
                    return Ok(Settlement::Detached);
                }
                let job = job_at(&mut state, index)?;
                let now = Utc::now();

                let done = match outcome {
                    Ok(result) => {
                        job.complete(result, now);
                        tracing::info!(
                            "Job {} completed in {}ms (attempt {})",
                            job.id,
                            job.duration_ms.unwrap_or_default(),
                            job.attempts
                        );
                        state.processed += 1;
                        true
                    }
                    Err(e) => {
                        job.record_failure(e.to_string(), now);
                        if job.attempts >= config.retry_attempts {
                            job.fail();
                            tracing::error!(
                                "Job {} failed after {} attempts: {}",
                                job.id,
                                job.attempts,
                                e
                            );
                            let failed = FailedJobSummary::from_job(job);
                            state.failed += 1;
                            state.failed_jobs.push(failed);
                            true
                        } else {
                            tracing::warn!(
                                "Job {} attempt {}/{} failed: {}; retrying in {}ms",
                                job.id,
                                job.attempts,
                                config.retry_attempts,
                                e,
                                config.retry_delay_ms
                            );
                            false
                        }
                    }
                };
                done.then(|| state.progress(index))
            };

            if let Some(snapshot) = settled {
                return Ok(Settlement::Settled(snapshot));
            }
            if !config.retry_delay().is_zero() {
                time::sleep(config.retry_delay()).await;
            }
        }
    }

    /// Exit path for a loop whose batch was cancelled under it.
    fn finish_detached(&self, run: &RunContext) -> BatchSummary {
        let summary = BatchSummary {
            batch_id: run.batch_id,
            total: 0,
            processed: 0,
            failed: 0,
            failed_jobs: Vec::new(),
            duration_ms: elapsed_ms(run.started, Utc::now()),
        };
        tracing::info!("Run loop stopped after batch cancellation");
        if let Err(e) = notify("on_complete", || run.hooks.observer.on_complete(&summary)) {
            tracing::error!("{}", e);
        }
        summary
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new(BatchConfig::default()))),
        }
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("BatchProcessor")
            .field("batch_id", &state.batch_id)
            .field("jobs", &state.jobs.len())
            .field("processing", &state.processing)
            .finish()
    }
}

/// The job a run is working on. Its absence while the epoch still matches
/// means the queue was rearranged under the loop.
fn job_at(state: &mut QueueState, index: usize) -> AppResult<&mut Job> {
    state
        .jobs
        .get_mut(index)
        .ok_or_else(|| AppError::internal(format!("Job at position {index} vanished mid-run")))
}

/// One processor call. The outer `Err` is an infrastructure fault (the
/// processor panicked); the inner result is the attempt's own outcome.
async fn attempt(
    processor: Option<&Arc<dyn JobProcessor>>,
    job: &Job,
    timeout: Option<Duration>,
) -> AppResult<Result<Value, JobExecutionError>> {
    let Some(processor) = processor else {
        return Ok(Err(JobExecutionError::UnknownJobType(job.job_type.clone())));
    };

    let call = AssertUnwindSafe(processor.process(&job.payload, job)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Ok(Err(JobExecutionError::TimedOut(limit))),
        },
        None => call.await,
    };

    outcome.map_err(|panic| {
        AppError::internal(format!(
            "Processor for job type '{}' panicked on job {}: {}",
            job.job_type,
            job.id,
            panic_message(panic.as_ref())
        ))
    })
}

/// Invoke an observer callback. A panic becomes an infrastructure fault.
fn notify(callback: &str, f: impl FnOnce()) -> AppResult<()> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        AppError::internal(format!(
            "Batch observer panicked in {callback}: {}",
            panic_message(panic.as_ref())
        ))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
