//! Integration tests for the download pipeline without the HTTP layer:
//! coordinator, fetch workers, packager and registry sweeping.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use batchfetch::config::FetchConfig;
use batchfetch::jobs::{
    Batch, Coordinator, FailureReason, InputMode, JobError, JobRegistry, JobStatus, Outcome, Task,
};
use batchfetch::observability::Metrics;
use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

use common::{start_file_server, zip_entries, zip_text};

fn coordinator(root: &TempDir, pool_size: usize) -> (Coordinator, Arc<Metrics>) {
    let registry = Arc::new(JobRegistry::new(root.path(), Duration::from_secs(3600)));
    let metrics = Arc::new(Metrics::new());
    let config = FetchConfig {
        pool_size,
        timeout_seconds: 5,
        ..FetchConfig::default()
    };
    let coordinator = Coordinator::from_config(registry, &config, metrics.clone()).unwrap();
    (coordinator, metrics)
}

fn direct_batch(urls: impl IntoIterator<Item = String>) -> Batch {
    Batch {
        mode: InputMode::Direct,
        tasks: urls.into_iter().map(Task::new).collect(),
        ..Batch::default()
    }
}

async fn finished(job: &batchfetch::jobs::Job) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(10), job.wait_finished())
        .await
        .expect("job did not finish in time")
}

#[tokio::test]
async fn test_successes_and_failures_are_packaged() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, metrics) = coordinator(&root, 3);

    let job = coordinator.submit(direct_batch([
        server.url("a.pdf"),
        server.url("missing.pdf"),
    ]));

    assert_eq!(finished(&job).await, JobStatus::Completed);
    assert_eq!(job.completed(), 2);
    assert_eq!(job.failed(), 1);

    let outcomes = job.outcomes();
    assert!(outcomes[0].outcome.is_success());
    match &outcomes[1].outcome {
        Outcome::Failure(failure) => {
            assert_eq!(failure.reason, FailureReason::HttpStatus(404));
        }
        Outcome::Success(_) => panic!("missing.pdf should fail"),
    }

    let archive = std::fs::read(job.archive_path().unwrap()).unwrap();
    assert_eq!(zip_entries(&archive), vec!["a.pdf", "errors.txt"]);
    assert_eq!(
        zip_text(&archive, "errors.txt"),
        format!("{}\tHTTP 404\n", server.url("missing.pdf"))
    );

    // Download counters are updated before outcomes are recorded.
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.jobs_submitted, 1);
    assert_eq!(snapshot.downloads_succeeded, 1);
    assert_eq!(snapshot.downloads_failed, 1);
}

#[tokio::test]
async fn test_duplicate_names_are_made_unique() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, _) = coordinator(&root, 2);

    let job = coordinator.submit(Batch {
        mode: InputMode::Direct,
        tasks: vec![
            Task::new(server.url("a.pdf")),
            Task::new(server.url("b.pdf")).with_name("a.pdf"),
        ],
        ..Batch::default()
    });

    assert_eq!(finished(&job).await, JobStatus::Completed);
    let archive = std::fs::read(job.archive_path().unwrap()).unwrap();
    assert_eq!(zip_entries(&archive), vec!["a.pdf", "a-2.pdf"]);
    assert_eq!(zip_text(&archive, "a-2.pdf"), "content of b.pdf");
}

#[tokio::test]
async fn test_pool_size_bounds_concurrent_fetches() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, _) = coordinator(&root, 3);

    let urls: Vec<String> = (0..10).map(|i| server.url(&format!("busy-{i}.txt"))).collect();
    let job = coordinator.submit(direct_batch(urls));

    assert_eq!(finished(&job).await, JobStatus::Completed);
    assert_eq!(job.failed(), 0);
    assert_eq!(server.stats.requests.load(Ordering::SeqCst), 10);

    let max_in_flight = server.stats.max_in_flight.load(Ordering::SeqCst);
    assert!(max_in_flight >= 1);
    assert!(max_in_flight <= 3, "saw {max_in_flight} concurrent fetches");
}

#[tokio::test]
async fn test_job_stays_running_until_every_outcome_is_in() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, _) = coordinator(&root, 1);

    let urls: Vec<String> = (0..4).map(|i| server.url(&format!("busy-{i}.txt"))).collect();
    let job = coordinator.submit(direct_batch(urls));

    let mut saw_partial_progress = false;
    let status = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = job.snapshot();
            assert!(snapshot.completed <= snapshot.total);
            if snapshot.status.is_terminal() {
                assert_eq!(snapshot.completed, snapshot.total);
                break snapshot.status;
            }
            if snapshot.status == JobStatus::Running
                && snapshot.completed > 0
                && snapshot.completed < snapshot.total
            {
                saw_partial_progress = true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time");

    assert_eq!(status, JobStatus::Completed);
    assert!(saw_partial_progress, "never observed a running job mid-way");
    assert_eq!(job.completed(), 4);
    assert_eq!(job.failed(), 0);
}

#[tokio::test]
async fn test_cancel_keeps_finished_downloads() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, _) = coordinator(&root, 1);

    let job = coordinator.submit(direct_batch([
        server.url("slow-a.pdf"),
        server.url("b.pdf"),
        server.url("c.pdf"),
    ]));

    // Wait until the first fetch is on the wire, then cancel.
    for _ in 0..100 {
        if server.stats.in_flight.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = coordinator.cancel(job.id()).unwrap();
    assert_eq!(snapshot.job_id, job.id());

    assert_eq!(finished(&job).await, JobStatus::Cancelled);
    assert_eq!(server.stats.requests.load(Ordering::SeqCst), 1);

    let archive = std::fs::read(job.archive_path().unwrap()).unwrap();
    assert_eq!(zip_entries(&archive), vec!["slow-a.pdf", "errors.txt"]);

    let report = zip_text(&archive, "errors.txt");
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(&server.url("b.pdf")));
    assert!(lines[0].ends_with("cancelled before download"));
    assert!(lines[1].starts_with(&server.url("c.pdf")));
}

#[tokio::test]
async fn test_sweep_evicts_idle_jobs() {
    let root = TempDir::new().unwrap();
    let server = start_file_server().await;
    let (coordinator, _) = coordinator(&root, 2);
    let registry = coordinator.registry().clone();

    let job = coordinator.submit(direct_batch([server.url("a.pdf")]));
    assert_eq!(finished(&job).await, JobStatus::Completed);

    let archive = job.archive_path().unwrap();
    assert!(archive.exists());
    assert!(job.work_dir().exists());

    // Inside the retention window nothing happens.
    let stats = registry.sweep_at(Utc::now() + TimeDelta::minutes(30)).await;
    assert_eq!(stats.jobs_evicted, 0);
    assert!(registry.get(job.id()).is_ok());

    let stats = registry.sweep_at(Utc::now() + TimeDelta::minutes(90)).await;
    assert_eq!(stats.jobs_evicted, 1);
    assert!(matches!(registry.get(job.id()), Err(JobError::NotFound(_))));
    assert!(!archive.exists());
    assert!(!job.work_dir().exists());
}

#[tokio::test]
async fn test_download_restarts_retention_window() {
    let root = TempDir::new().unwrap();
    let (coordinator, _) = coordinator(&root, 1);
    let registry = coordinator.registry().clone();

    let job = coordinator.submit(direct_batch(Vec::new()));
    assert_eq!(finished(&job).await, JobStatus::Completed);

    let later = Utc::now() + TimeDelta::minutes(50);
    registry.touch_at(job.id(), later).unwrap();

    let stats = registry.sweep_at(Utc::now() + TimeDelta::minutes(90)).await;
    assert_eq!(stats.jobs_evicted, 0);

    let stats = registry.sweep_at(later + TimeDelta::minutes(61)).await;
    assert_eq!(stats.jobs_evicted, 1);
}
