//! Batch job processing for PhotoBatch.
//!
//! This crate provides:
//! - A processor registry that dispatches jobs to handlers by type
//! - An observer seam for progress, completion and fault notifications
//! - The batch processor: a single-flight run loop with per-job retries,
//!   a fixed inter-job delay, and pause/resume/cancel/retry controls

pub mod observer;
pub mod processor;
mod queue;
pub mod runner;

pub use observer::{BatchEvent, BatchObserver, ChannelObserver, NoopObserver};
pub use processor::{JobExecutionError, JobProcessor, ProcessorRegistry, processor_fn};
pub use runner::BatchProcessor;
