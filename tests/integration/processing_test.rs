//! Integration tests for the run loop: retries, ordering, delays, progress.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

use photobatch_entity::job::{JobDescriptor, JobStatus};
use photobatch_worker::{JobExecutionError, processor_fn};

#[tokio::test(start_paused = true)]
async fn test_always_succeeding_batch() {
    let processor = helpers::fast_processor(3);
    processor
        .add_batch(helpers::photo_jobs(&["a", "b", "c", "d"]), None)
        .expect("submit");
    let (worker, log) = helpers::succeeding_processor();
    let observer = helpers::RecordingObserver::new();

    let summary = processor
        .start_processing(helpers::registry(worker), observer.clone())
        .await
        .expect("run");

    assert_eq!(summary.total, 4);
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 0);
    assert!(summary.failed_jobs.is_empty());
    assert!(summary.is_fully_successful());
    assert_eq!(observer.completes(), vec![summary.clone()]);
    assert!(observer.errors().is_empty());
    assert_eq!(log.lock().expect("lock").len(), 4);

    let details = processor.get_queue_details();
    for job in &details.jobs {
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.result, Some(json!({"analyzed": job.id.as_str()})));
        assert!(job.finished_at.is_some());
    }

    let status = processor.get_status();
    assert!(!status.is_processing);
    assert!(status.current_job.is_none());
    assert_eq!(status.progress_percent, 100);
    assert_eq!(status.counts.completed, 4);
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_batch_exhausts_attempts() {
    let processor = helpers::fast_processor(3);
    processor
        .add_batch(helpers::photo_jobs(&["a", "b", "c"]), None)
        .expect("submit");
    let observer = helpers::RecordingObserver::new();

    let summary = processor
        .start_processing(
            helpers::registry(helpers::failing_processor()),
            observer.clone(),
        )
        .await
        .expect("job failures do not fail the run");

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.failed_jobs.len(), 3);
    assert_eq!(observer.completes().len(), 1);
    assert_eq!(observer.progress().len(), 3);

    let failed = &summary.failed_jobs[1];
    assert_eq!(failed.id.as_str(), "b");
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.error, "analysis failed for b");
    assert_eq!(failed.attributes.get("photoTitle"), Some(&json!("Photo b")));

    for job in processor.get_queue_details().jobs {
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        let last = job.last_error.expect("error recorded");
        assert_eq!(last.attempt, 3);
        assert!(job.result.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_flaky_job_recovers_on_third_attempt() {
    let processor = helpers::fast_processor(3);
    processor
        .add_batch(helpers::photo_jobs(&["A", "B", "C"]), None)
        .expect("submit");
    let (worker, log) = helpers::flaky_processor(&[("B", 2)]);
    let observer = helpers::RecordingObserver::new();

    let summary = processor
        .start_processing(helpers::registry(worker), observer.clone())
        .await
        .expect("run");

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 0);

    let jobs = processor.get_queue_details().jobs;
    let attempts: Vec<(&str, JobStatus, u32)> = jobs
        .iter()
        .map(|j| (j.id.as_str(), j.status, j.attempts))
        .collect();
    assert_eq!(
        attempts,
        vec![
            ("A", JobStatus::Completed, 1),
            ("B", JobStatus::Completed, 3),
            ("C", JobStatus::Completed, 1),
        ]
    );
    assert!(jobs[1].last_error.is_none());

    let calls = log.lock().expect("lock").clone();
    assert_eq!(
        calls,
        vec![
            ("A".to_string(), 1),
            ("B".to_string(), 1),
            ("B".to_string(), 2),
            ("B".to_string(), 3),
            ("C".to_string(), 1),
        ]
    );

    // one progress event per settled job, not per attempt
    let progress = observer.progress();
    assert_eq!(progress.len(), 3);
    assert_eq!(progress[1].current_job.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_progress_snapshots() {
    let processor = helpers::fast_processor(1);
    processor
        .add_batch(helpers::photo_jobs(&["a", "b", "c"]), None)
        .expect("submit");
    let (worker, _log) = helpers::flaky_processor(&[("b", 1)]);
    let observer = helpers::RecordingObserver::new();

    processor
        .start_processing(helpers::registry(worker), observer.clone())
        .await
        .expect("run");

    let progress = observer.progress();
    let shape: Vec<(usize, usize, usize, usize, u8)> = progress
        .iter()
        .map(|p| (p.current, p.total, p.processed, p.failed, p.progress_percent))
        .collect();
    assert_eq!(
        shape,
        vec![(1, 3, 1, 0, 33), (2, 3, 1, 1, 67), (3, 3, 2, 1, 100)]
    );
    assert_eq!(progress[1].current_job.status, JobStatus::Failed);
    assert!(progress.iter().all(|p| p.batch_id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_default_delays_pace_the_batch() {
    let processor = helpers::default_processor();
    processor
        .add_batch(helpers::photo_jobs(&["A", "B", "C"]), None)
        .expect("submit");
    let (worker, _log) = helpers::flaky_processor(&[("B", 2)]);

    let started = Instant::now();
    processor
        .start_processing(
            helpers::registry(worker),
            helpers::RecordingObserver::new(),
        )
        .await
        .expect("run");
    let elapsed = started.elapsed();

    // two inter-job gaps of 1s plus two retry waits of 2s
    assert!(elapsed >= Duration::from_millis(6000), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(6100), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_jobs_run_one_at_a_time_in_order() {
    let processor = helpers::fast_processor(3);
    let ids = ["j1", "j2", "j3", "j4", "j5"];
    processor
        .add_batch(helpers::photo_jobs(&ids), None)
        .expect("submit");

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let worker = {
        let in_flight = Arc::clone(&in_flight);
        let max_in_flight = Arc::clone(&max_in_flight);
        let order = Arc::clone(&order);
        processor_fn(move |_, job| {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            let order = Arc::clone(&order);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                order.lock().expect("lock").push(job.id.to_string());
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
    };

    processor
        .start_processing(
            helpers::registry(worker),
            helpers::RecordingObserver::new(),
        )
        .await
        .expect("run");

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(*order.lock().expect("lock"), ids.map(String::from).to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_job_types_dispatch_to_their_processors() {
    let processor = helpers::fast_processor(2);
    processor
        .add_batch(
            vec![
                JobDescriptor::new(json!("photo")).with_id("analysis"),
                JobDescriptor::new(json!("photo")).with_id("thumb").with_type("thumbnail"),
                JobDescriptor::new(json!("photo")).with_id("ocr").with_type("ocr"),
            ],
            None,
        )
        .expect("submit");

    let registry = helpers::registry(processor_fn(|_, _| async { Ok(json!("analysis")) }))
        .with(
            "thumbnail",
            processor_fn(|_, _| async { Ok(json!("thumbnail")) }),
        );
    let summary = processor
        .start_processing(registry, helpers::RecordingObserver::new())
        .await
        .expect("run");

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    let jobs = processor.get_queue_details().jobs;
    assert_eq!(jobs[0].result, Some(json!("analysis")));
    assert_eq!(jobs[1].result, Some(json!("thumbnail")));
    assert_eq!(jobs[2].status, JobStatus::Failed);
    assert_eq!(jobs[2].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_processor_errors_carry_their_message() {
    let processor = helpers::fast_processor(1);
    processor
        .add_batch(helpers::photo_jobs(&["x"]), None)
        .expect("submit");
    let worker = processor_fn(|_, _| async {
        Err(JobExecutionError::from(anyhow::anyhow!(
            "HTTP 429 from vision API"
        )))
    });

    let summary = processor
        .start_processing(
            helpers::registry(worker),
            helpers::RecordingObserver::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.failed_jobs[0].error, "HTTP 429 from vision API");
}
