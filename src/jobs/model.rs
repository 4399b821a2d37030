//! Job, task and outcome types.
//!
//! A [`Job`] is created from a resolved [`Batch`] and owned by the
//! [`JobRegistry`](super::JobRegistry) for its whole lifetime. The coordinator
//! is the only writer: it moves the status forward and appends one
//! [`TaskOutcome`] per task. Readers get progress from atomics and the status
//! from a watch channel, so polling never contends with the workers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::resolver::ProductSelection;

pub type HeadersMap = BTreeMap<String, String>;

/// One unit of download work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub url: String,
    /// Archive entry name; derived from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: HeadersMap,
}

impl Task {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            headers: HeadersMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_headers(mut self, headers: HeadersMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Why a row or a task did not produce a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("no products found")]
    NoProductsFound,
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("resolver error: {0}")]
    Resolution(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("cancelled before download")]
    Cancelled,
}

/// A CSV row that never became a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// 1-based line number in the uploaded file.
    pub line: usize,
    /// The URL or timestamp text of the row; empty for blank lines.
    pub source: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Direct,
    Timestamp,
}

/// Output of the CSV resolver and input to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub mode: InputMode,
    pub tasks: Vec<Task>,
    pub rejections: Vec<Rejection>,
    /// Products looked up for timestamp rows.
    pub selection: Option<ProductSelection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Entry name inside the result archive.
    pub name: String,
    /// Location of the downloaded body in the job's work directory.
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub url: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Artifact),
    Failure(Failure),
}

impl Outcome {
    pub fn failure(url: impl Into<String>, reason: FailureReason) -> Self {
        Outcome::Failure(Failure {
            url: url.into(),
            reason,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// An outcome tagged with the position of its task in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub index: usize,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Client-visible view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub mode: InputMode,
    pub status: JobStatus,
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub rejected: usize,
    pub result_ready: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct JobState {
    outcomes: Vec<TaskOutcome>,
    recorded: Vec<bool>,
    finished_at: Option<DateTime<Utc>>,
    archive: Option<PathBuf>,
    error: Option<String>,
}

/// Tasks and rejections, fixed once the rows are resolved.
#[derive(Debug)]
struct Plan {
    tasks: Vec<Task>,
    rejections: Vec<Rejection>,
}

pub struct Job {
    id: String,
    mode: InputMode,
    selection: Option<ProductSelection>,
    plan: OnceLock<Plan>,
    created_at: DateTime<Utc>,
    work_dir: PathBuf,
    cancel: CancellationToken,
    completed: AtomicUsize,
    failed: AtomicUsize,
    status: watch::Sender<JobStatus>,
    state: Mutex<JobState>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        batch: Batch,
        work_dir: impl Into<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let job = Self::awaiting(id, batch.mode, batch.selection.clone(), work_dir, created_at);
        job.plan(batch);
        job
    }

    /// A Pending job whose rows are still being resolved. It has no tasks
    /// until [`plan`](Self::plan) is called.
    pub fn awaiting(
        id: impl Into<String>,
        mode: InputMode,
        selection: Option<ProductSelection>,
        work_dir: impl Into<PathBuf>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let (status, _) = watch::channel(JobStatus::Pending);

        Self {
            id: id.into(),
            mode,
            selection,
            plan: OnceLock::new(),
            created_at,
            work_dir: work_dir.into(),
            cancel: CancellationToken::new(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            status,
            state: Mutex::new(JobState::default()),
        }
    }

    /// Fixes the task list. Only the first call has an effect.
    pub(crate) fn plan(&self, batch: Batch) -> bool {
        let total = batch.tasks.len();
        let plan = Plan {
            tasks: batch.tasks,
            rejections: batch.rejections,
        };
        if self.plan.set(plan).is_err() {
            return false;
        }
        let mut state = self.state.lock();
        state.outcomes.reserve(total);
        state.recorded = vec![false; total];
        true
    }

    /// Whether the task list is known.
    pub fn is_planned(&self) -> bool {
        self.plan.get().is_some()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn selection(&self) -> Option<&ProductSelection> {
        self.selection.as_ref()
    }

    pub fn tasks(&self) -> &[Task] {
        self.plan
            .get()
            .map(|plan| plan.tasks.as_slice())
            .unwrap_or_default()
    }

    pub fn rejections(&self) -> &[Rejection] {
        self.plan
            .get()
            .map(|plan| plan.rejections.as_slice())
            .unwrap_or_default()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Private scratch directory holding this job's downloads.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    pub fn total(&self) -> usize {
        self.tasks().len()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.state.lock().archive.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Outcomes recorded so far, in task order.
    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        let mut outcomes = self.state.lock().outcomes.clone();
        outcomes.sort_by_key(|entry| entry.index);
        outcomes
    }

    /// Requests cooperative cancellation. Returns `false` for finished jobs.
    pub fn cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits until the job reaches a terminal status.
    pub async fn wait_finished(&self) -> JobStatus {
        let mut receiver = self.status.subscribe();
        match receiver.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let status = self.status();
        let state = self.state.lock();
        JobSnapshot {
            job_id: self.id.clone(),
            mode: self.mode,
            status,
            completed: self.completed(),
            total: self.total(),
            failed: self.failed(),
            rejected: self.rejections().len(),
            result_ready: state.archive.is_some(),
            created_at: self.created_at,
            finished_at: state.finished_at,
            error: state.error.clone(),
        }
    }

    pub(crate) fn start(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == JobStatus::Pending {
                *status = JobStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Appends the outcome for `index`. A second outcome for the same task is
    /// dropped and `false` is returned.
    pub(crate) fn record(&self, index: usize, outcome: Outcome) -> bool {
        let mut state = self.state.lock();
        match state.recorded.get_mut(index) {
            Some(seen) if !*seen => *seen = true,
            _ => return false,
        }
        if !outcome.is_success() {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        state.outcomes.push(TaskOutcome { index, outcome });
        self.completed.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub(crate) fn missing_indices(&self) -> Vec<usize> {
        let state = self.state.lock();
        state
            .recorded
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(index, _)| index)
            .collect()
    }

    /// Moves the job into a terminal status. Only the first call wins.
    pub(crate) fn finish(
        &self,
        status: JobStatus,
        archive: Option<PathBuf>,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        {
            let mut state = self.state.lock();
            if state.finished_at.is_some() {
                return false;
            }
            state.finished_at = Some(at);
            state.archive = archive;
            state.error = error;
        }
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = status;
                true
            }
        })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("completed", &self.completed())
            .field("total", &self.total())
            .finish()
    }
}
