//! PhotoBatch runner: dry-runs a batch file through the batch processor.
//!
//! Every job is handed to a processor that echoes its payload back, so a
//! batch file and the configured rate/retry policy can be checked without
//! touching any external API. Ctrl-C pauses after the job in flight.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt};

use photobatch_core::config::AppConfig;
use photobatch_core::config::logging::LoggingConfig;
use photobatch_core::error::AppError;
use photobatch_entity::batch::BatchSummary;
use photobatch_entity::job::{DEFAULT_JOB_TYPE, JobDescriptor};
use photobatch_worker::{
    BatchEvent, BatchProcessor, ChannelObserver, ProcessorRegistry, processor_fn,
};

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "photobatch-runner", version, about = "Dry-run a PhotoBatch job file")]
struct Cli {
    /// JSON file containing an array of job descriptors
    jobs: PathBuf,

    /// Configuration environment overlay (`config/{env}.toml`)
    #[arg(long, default_value = "development")]
    env: String,

    /// Optional batch name
    #[arg(long)]
    name: Option<String>,

    /// Override the configured log format (`json` or `pretty`)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }

    init_logging(&config.logging);

    match run(cli, config).await {
        Ok(summary) if summary.failed > 0 => std::process::exit(2),
        Ok(_) => {}
        Err(e) => {
            tracing::error!("Batch run error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Submit the job file and drive it to the end of the run.
async fn run(cli: Cli, config: AppConfig) -> Result<BatchSummary, AppError> {
    tracing::info!("Starting photobatch-runner v{}", env!("CARGO_PKG_VERSION"));

    let raw = tokio::fs::read_to_string(&cli.jobs).await?;
    let descriptors: Vec<JobDescriptor> = serde_json::from_str(&raw)?;

    let processor = BatchProcessor::new(config.batch)?;
    let receipt = processor.add_batch(descriptors, cli.name.as_deref())?;
    tracing::info!(
        "Loaded {} jobs from '{}' into batch {}",
        receipt.job_count,
        cli.jobs.display(),
        receipt.batch_id
    );

    let registry = dry_run_registry(&processor);
    let (observer, mut events) = ChannelObserver::new();
    let handle = processor.spawn_processing(registry, Arc::new(observer))?;

    let mut paused = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BatchEvent::Progress(p)) => {
                    tracing::info!(
                        "[{}%] job {}/{} '{}' {}",
                        p.progress_percent,
                        p.current,
                        p.total,
                        p.current_job.id,
                        p.current_job.status
                    );
                }
                Some(BatchEvent::Complete(_)) | Some(BatchEvent::Error(_)) | None => break,
            },
            _ = tokio::signal::ctrl_c(), if !paused => {
                paused = processor.pause();
                tracing::warn!("Interrupted, pausing after the job in flight");
            }
        }
    }

    let summary = handle
        .await
        .map_err(|e| AppError::internal(format!("Run loop task failed: {e}")))??;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

/// One echoing processor for every job type present in the queue.
fn dry_run_registry(processor: &BatchProcessor) -> ProcessorRegistry {
    let mut types: BTreeSet<String> = processor
        .get_queue_details()
        .jobs
        .into_iter()
        .map(|job| job.job_type)
        .collect();
    types.insert(DEFAULT_JOB_TYPE.to_string());

    let mut registry = ProcessorRegistry::new();
    for job_type in types {
        registry.register(
            job_type,
            processor_fn(|payload, job| async move {
                Ok(json!({
                    "dryRun": true,
                    "type": job.job_type,
                    "payload": payload,
                }))
            }),
        );
    }
    registry
}
