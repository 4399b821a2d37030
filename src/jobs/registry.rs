//! In-memory job registry with retention sweeping.
//!
//! Every job lives under `<root>/<job_id>/` (downloads) and
//! `<root>/<job_id>.zip` (result). A job becomes eligible for eviction once it
//! has been idle for longer than the retention window; the idle clock starts
//! at `finished_at` (or `created_at` while pending) and restarts whenever the
//! result is downloaded. Running jobs, and pending jobs still resolving their
//! rows, are never evicted.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::JobError;
use super::model::{Job, JobStatus};
use crate::observability::Metrics;

/// Sweep statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub jobs_evicted: usize,
    pub paths_removed: usize,
}

struct RegistryEntry {
    job: Arc<Job>,
    last_touched: DateTime<Utc>,
}

impl RegistryEntry {
    /// Start of the idle period, or `None` while the job is busy.
    fn idle_since(&self) -> Option<DateTime<Utc>> {
        let anchor = match self.job.status() {
            JobStatus::Running => return None,
            JobStatus::Pending if !self.job.is_planned() => return None,
            JobStatus::Pending => self.job.created_at(),
            _ => self.job.finished_at().unwrap_or_else(|| self.job.created_at()),
        };
        Some(anchor.max(self.last_touched))
    }
}

pub struct JobRegistry {
    root: PathBuf,
    retention: TimeDelta,
    jobs: RwLock<HashMap<String, RegistryEntry>>,
}

impl JobRegistry {
    pub fn new(root: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            root: root.into(),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn archive_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}.zip"))
    }

    pub fn register(&self, job: Arc<Job>) {
        let entry = RegistryEntry {
            last_touched: job.created_at(),
            job,
        };
        self.jobs.write().insert(entry.job.id().to_string(), entry);
    }

    pub fn get(&self, job_id: &str) -> Result<Arc<Job>, JobError> {
        self.jobs
            .read()
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Restarts the idle clock of a job.
    pub fn touch(&self, job_id: &str) -> Result<(), JobError> {
        self.touch_at(job_id, Utc::now())
    }

    pub fn touch_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<(), JobError> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        entry.last_touched = entry.last_touched.max(now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Drops a finished job and its files right away.
    pub async fn remove(&self, job_id: &str) -> Result<(), JobError> {
        {
            let mut jobs = self.jobs.write();
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
            if !entry.job.status().is_terminal() {
                return Err(JobError::StillRunning(job_id.to_string()));
            }
            jobs.remove(job_id);
        }
        let removed = self.delete_files(job_id).await;
        info!(job_id, removed, "Job removed");
        Ok(())
    }

    pub async fn sweep(&self) -> SweepStats {
        self.sweep_at(Utc::now()).await
    }

    /// Evicts every job idle for longer than the retention window at `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepStats {
        let expired: Vec<String> = {
            let mut jobs = self.jobs.write();
            let ids: Vec<String> = jobs
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .idle_since()
                        .is_some_and(|since| now - since > self.retention)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                jobs.remove(id);
            }
            ids
        };

        let mut stats = SweepStats {
            jobs_evicted: expired.len(),
            ..SweepStats::default()
        };
        for job_id in &expired {
            stats.paths_removed += self.delete_files(job_id).await;
            debug!(job_id = %job_id, "Job evicted");
        }

        if stats.jobs_evicted > 0 {
            info!(?stats, "Sweep complete");
        }
        stats
    }

    /// Deletes work-directory entries that belong to no registered job and are
    /// older than the retention window. Used once at startup.
    pub async fn sweep_orphans(&self, now: DateTime<Utc>) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(root = %self.root.display(), error = %err, "Cannot scan work directory");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Work directory scan interrupted");
                    break;
                }
            };

            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let job_id = name.strip_suffix(".zip").unwrap_or(name.as_ref());
            if self.jobs.read().contains_key(job_id) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(err) => {
                    debug!(path = %entry.path().display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            if now - modified <= self.retention {
                continue;
            }

            if remove_path(&entry.path()).await {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Removed orphaned work files");
        }
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let stats = self.sweep().await;
                        metrics.jobs_evicted(stats.jobs_evicted);
                    }
                }
            }
            debug!("Sweeper stopped");
        })
    }

    async fn delete_files(&self, job_id: &str) -> usize {
        let mut removed = 0;
        for path in [self.job_dir(job_id), self.archive_path(job_id)] {
            if remove_path(&path).await {
                removed += 1;
            }
        }
        removed
    }
}

async fn remove_path(path: &Path) -> bool {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to remove path");
            false
        }
    }
}
