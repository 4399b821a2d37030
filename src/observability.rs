//! Observability (tracing setup, in-process counters)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::jobs::JobStatus;

/// Installs the global `fmt` subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    jobs_evicted: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_finished(&self, status: JobStatus) {
        let (counter, name) = match status {
            JobStatus::Completed => (&self.jobs_completed, "jobs_completed"),
            JobStatus::Failed => (&self.jobs_failed, "jobs_failed"),
            JobStatus::Cancelled => (&self.jobs_cancelled, "jobs_cancelled"),
            JobStatus::Pending | JobStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = name, "Metric incremented");
    }

    pub fn jobs_evicted(&self, count: usize) {
        self.jobs_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn download_finished(&self, succeeded: bool) {
        if succeeded {
            self.downloads_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            jobs_evicted: self.jobs_evicted.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_evicted: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
}
