//! Job coordinator: drives one job from submission to a packaged result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::JobError;
use super::model::{Batch, FailureReason, InputMode, Job, JobSnapshot, JobStatus, Outcome};
use super::packager;
use super::registry::JobRegistry;
use crate::config::FetchConfig;
use crate::observability::Metrics;
use crate::resolver::{PendingLookup, PreparedBatch};
use crate::worker::{DownloadError, HttpClient, HttpConfig, runner};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Maximum concurrent fetches per job.
    pub pool_size: usize,
    /// Cancels the job once elapsed. `None` means no limit.
    pub job_deadline: Option<Duration>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            pool_size: 3,
            job_deadline: None,
        }
    }
}

impl From<&FetchConfig> for CoordinatorSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            job_deadline: config.job_deadline(),
        }
    }
}

#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<JobRegistry>,
    client: Arc<HttpClient>,
    settings: CoordinatorSettings,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<JobRegistry>,
        client: Arc<HttpClient>,
        settings: CoordinatorSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            client,
            settings,
            metrics,
        }
    }

    /// Builds a coordinator with its own HTTP client from the fetch settings.
    pub fn from_config(
        registry: Arc<JobRegistry>,
        config: &FetchConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, DownloadError> {
        let client = HttpClient::new(HttpConfig::from(config))?;
        Ok(Self::new(
            registry,
            Arc::new(client),
            CoordinatorSettings::from(config),
            metrics,
        ))
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Registers a new job for `batch` and starts it in the background.
    pub fn submit(&self, batch: Batch) -> Arc<Job> {
        let id = Uuid::now_v7().to_string();
        let job = self.register(Job::new(
            id.clone(),
            batch,
            self.registry.job_dir(&id),
            Utc::now(),
        ));

        info!(
            job_id = %id,
            tasks = job.total(),
            rejected = job.rejections().len(),
            mode = ?job.mode(),
            "Job submitted"
        );

        let coordinator = self.clone();
        let running = job.clone();
        tokio::spawn(async move { coordinator.run(running).await });

        job
    }

    pub fn submit_prepared(&self, prepared: PreparedBatch) -> Arc<Job> {
        match prepared {
            PreparedBatch::Ready(batch) => self.submit(batch),
            PreparedBatch::Lookup(pending) => self.submit_lookup(pending),
        }
    }

    /// Registers a job right away and resolves its rows in the background.
    /// The job stays Pending until every row has been looked up; cancelling
    /// it meanwhile rejects the rows not yet resolved.
    pub fn submit_lookup(&self, pending: PendingLookup) -> Arc<Job> {
        let id = Uuid::now_v7().to_string();
        let job = self.register(Job::awaiting(
            id.clone(),
            InputMode::Timestamp,
            Some(pending.selection().clone()),
            self.registry.job_dir(&id),
            Utc::now(),
        ));

        info!(job_id = %id, rows = pending.len(), "Job submitted, resolving rows");

        let coordinator = self.clone();
        let running = job.clone();
        tokio::spawn(async move {
            let batch = pending.resolve(running.cancellation()).await;
            debug!(
                job_id = running.id(),
                tasks = batch.tasks.len(),
                rejected = batch.rejections.len(),
                "Rows resolved"
            );
            running.plan(batch);
            coordinator.run(running).await
        });

        job
    }

    fn register(&self, job: Job) -> Arc<Job> {
        let job = Arc::new(job);
        self.registry.register(job.clone());
        self.metrics.job_submitted();
        job
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        Ok(self.registry.get(job_id)?.snapshot())
    }

    /// Stops dispatching new tasks for the job. Fetches already in flight
    /// finish normally. Finished jobs are left untouched.
    pub fn cancel(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        let job = self.registry.get(job_id)?;
        if job.cancel() {
            info!(job_id, "Cancellation requested");
        } else {
            debug!(job_id, status = ?job.status(), "Cancel ignored for finished job");
        }
        Ok(job.snapshot())
    }

    async fn run(self, job: Arc<Job>) {
        if !job.start() {
            return;
        }

        let deadline = self.settings.job_deadline.map(|limit| {
            let token = job.cancellation().clone();
            let job_id = job.id().to_string();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(job_id = %job_id, ?limit, "Job deadline reached, cancelling");
                token.cancel();
            })
        });

        if let Err(err) = tokio::fs::create_dir_all(job.work_dir()).await {
            // Every fetch will fail with a storage error; the job still packages.
            error!(job_id = job.id(), error = %err, "Cannot create job directory");
        }

        self.dispatch(&job).await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        self.finalize(&job).await;
    }

    async fn dispatch(&self, job: &Arc<Job>) {
        let permits = Arc::new(Semaphore::new(self.settings.pool_size.max(1)));
        let token = job.cancellation().clone();
        let mut in_flight = JoinSet::new();

        for (index, task) in job.tasks().iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = permits.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                job.record(index, Outcome::failure(task.url.clone(), FailureReason::Cancelled));
                continue;
            };

            let job = job.clone();
            let client = self.client.clone();
            let metrics = self.metrics.clone();
            let task = task.clone();
            in_flight.spawn(async move {
                let outcome = runner::attempt(&client, index, &task, job.work_dir()).await;
                drop(permit);
                metrics.download_finished(outcome.is_success());
                job.record(index, outcome);
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                error!(job_id = job.id(), error = %err, "Fetch worker aborted");
            }
        }

        for index in job.missing_indices() {
            let url = job.tasks()[index].url.clone();
            job.record(
                index,
                Outcome::failure(url, FailureReason::NetworkError("fetch worker aborted".to_string())),
            );
        }
    }

    async fn finalize(&self, job: &Arc<Job>) {
        let cancelled = job.is_cancel_requested();
        let destination = self.registry.archive_path(job.id());

        let status = match packager::package(job, destination).await {
            Ok(path) => {
                let status = if cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Completed
                };
                job.finish(status, Some(path), None, Utc::now());
                status
            }
            Err(err) => {
                error!(job_id = job.id(), error = %err, "Packaging failed");
                job.finish(JobStatus::Failed, None, Some(err.to_string()), Utc::now());
                JobStatus::Failed
            }
        };

        self.metrics.job_finished(status);
        info!(
            job_id = job.id(),
            ?status,
            completed = job.completed(),
            failed = job.failed(),
            rejected = job.rejections().len(),
            "Job finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::Task;
    use crate::resolver::{
        ProductLink, ProductQuery, ProductResolver, ProductSelection, ResolverError, prepare_batch,
    };
    use async_trait::async_trait;

    /// Finds nothing, after a pause.
    struct SlowResolver(Duration);

    #[async_trait]
    impl ProductResolver for SlowResolver {
        async fn resolve(&self, _query: &ProductQuery) -> Result<Vec<ProductLink>, ResolverError> {
            tokio::time::sleep(self.0).await;
            Ok(Vec::new())
        }
    }

    fn timestamp_upload(resolver: SlowResolver) -> PreparedBatch {
        let selection = ProductSelection {
            products: vec!["ATL_NOM_1B".to_string()],
            ..ProductSelection::default()
        };
        prepare_batch(
            b"datetime\n2024-08-10T02:00:00Z\n2024-08-10T03:00:00Z\n",
            &selection,
            Some(Arc::new(resolver)),
        )
        .unwrap()
    }

    fn coordinator(root: &std::path::Path, pool_size: usize) -> Coordinator {
        let registry = Arc::new(JobRegistry::new(root, Duration::from_secs(3600)));
        let client = Arc::new(HttpClient::new(HttpConfig::default()).unwrap());
        Coordinator::new(
            registry,
            client,
            CoordinatorSettings {
                pool_size,
                job_deadline: None,
            },
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_empty_batch_completes_with_archive() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 3);

        let job = coordinator.submit(Batch::default());
        assert_eq!(job.wait_finished().await, JobStatus::Completed);

        let snapshot = coordinator.status(job.id()).unwrap();
        assert_eq!(snapshot.total, 0);
        assert!(snapshot.result_ready);
        assert!(job.archive_path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch_skips_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 1);
        let batch = Batch {
            mode: InputMode::Direct,
            tasks: vec![
                Task::new("http://127.0.0.1:9/a.pdf"),
                Task::new("http://127.0.0.1:9/b.pdf"),
            ],
            ..Batch::default()
        };

        // The run task cannot start before this test yields.
        let job = coordinator.submit(batch);
        coordinator.cancel(job.id()).unwrap();

        assert_eq!(job.wait_finished().await, JobStatus::Cancelled);
        assert_eq!(job.completed(), 2);
        assert!(job.outcomes().iter().all(|entry| matches!(
            &entry.outcome,
            Outcome::Failure(failure) if failure.reason == FailureReason::Cancelled
        )));
    }

    #[tokio::test]
    async fn test_lookup_happens_after_submit() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 1);

        let job = coordinator.submit_prepared(timestamp_upload(SlowResolver(Duration::from_millis(100))));

        assert_eq!(job.status(), JobStatus::Pending);
        assert!(!job.is_planned());
        assert_eq!(job.mode(), InputMode::Timestamp);
        assert!(job.selection().is_some());

        assert_eq!(job.wait_finished().await, JobStatus::Completed);
        assert_eq!(job.total(), 0);
        assert_eq!(job.rejections().len(), 2);
        assert!(job
            .rejections()
            .iter()
            .all(|r| r.reason == FailureReason::NoProductsFound));
        assert!(job.archive_path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_cancel_during_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 1);

        let job = coordinator.submit_prepared(timestamp_upload(SlowResolver(Duration::from_secs(60))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.cancel(job.id()).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), job.wait_finished())
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(job.rejections().len(), 2);
        assert!(job.rejections().iter().all(|r| r.reason == FailureReason::Cancelled));
        assert!(job.archive_path().is_some());
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 1);
        let job = coordinator.submit(Batch::default());
        job.wait_finished().await;

        let snapshot = coordinator.cancel(job.id()).unwrap();

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(!job.is_cancel_requested());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), 1);

        assert!(matches!(coordinator.status("missing"), Err(JobError::NotFound(_))));
        assert!(matches!(coordinator.cancel("missing"), Err(JobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deadline_cancels_job() {
        let dir = tempfile::tempdir().unwrap();
        // Accepts connections at the socket level but never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let registry = Arc::new(JobRegistry::new(dir.path(), Duration::from_secs(3600)));
        let client = HttpClient::new(HttpConfig {
            request_timeout: Duration::from_secs(1),
            ..HttpConfig::default()
        })
        .unwrap();
        let coordinator = Coordinator::new(
            registry,
            Arc::new(client),
            CoordinatorSettings {
                pool_size: 1,
                job_deadline: Some(Duration::from_millis(50)),
            },
            Arc::new(Metrics::new()),
        );
        let batch = Batch {
            tasks: (0..3)
                .map(|i| Task::new(format!("http://{addr}/{i}.bin")))
                .collect(),
            ..Batch::default()
        };

        let job = coordinator.submit(batch);

        assert_eq!(job.wait_finished().await, JobStatus::Cancelled);
        let outcomes = job.outcomes();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(
            &outcomes[2].outcome,
            Outcome::Failure(failure) if failure.reason == FailureReason::Cancelled
        ));
        drop(silent);
    }
}
