//! Batch jobs
//!
//! A job is submitted to the [`Coordinator`], which fans its tasks out to the
//! fetch workers, collects one outcome per task, and hands the result to the
//! packager. The [`JobRegistry`] keeps jobs and their files around until the
//! retention sweep evicts them.

pub mod coordinator;
pub mod error;
pub mod model;
pub mod packager;
pub mod registry;

pub use coordinator::{Coordinator, CoordinatorSettings};
pub use error::JobError;
pub use model::{
    Artifact, Batch, Failure, FailureReason, HeadersMap, InputMode, Job, JobSnapshot, JobStatus,
    Outcome, Rejection, Task, TaskOutcome,
};
pub use packager::{ArchivePlan, ERROR_REPORT_NAME, PackagingError, SUMMARY_NAME};
pub use registry::{JobRegistry, SweepStats};
