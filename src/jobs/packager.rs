//! Builds the result archive of a finished job.
//!
//! Successful downloads become ZIP entries in task order. Every rejection and
//! fetch failure becomes one `<url>\t<error>` line of `errors.txt`, which is
//! left out when nothing failed. Timestamp jobs also get a
//! `download_summary.txt` with the product selection and the counts.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::model::{FailureReason, InputMode, Job, Outcome};

pub const ERROR_REPORT_NAME: &str = "errors.txt";
pub const SUMMARY_NAME: &str = "download_summary.txt";

/// Failures listed in the summary; `errors.txt` has all of them.
const SUMMARY_MAX_ERRORS: usize = 20;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("packaging task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("archive path has no parent directory: {0}")]
    InvalidDestination(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureLine {
    pub url: String,
    pub message: String,
}

impl FailureLine {
    fn new(url: &str, reason: &FailureReason) -> Self {
        Self {
            url: single_line(url),
            message: single_line(&reason.to_string()),
        }
    }
}

/// Everything that goes into one archive, decided before any I/O happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePlan {
    pub entries: Vec<ArchiveEntry>,
    pub failures: Vec<FailureLine>,
    /// Contents of `download_summary.txt`, for timestamp jobs.
    pub summary: Option<String>,
}

impl ArchivePlan {
    pub fn for_job(job: &Job) -> Self {
        let with_summary = job.mode() == InputMode::Timestamp;
        let mut names = NameAllocator::default();
        names.reserve(ERROR_REPORT_NAME);
        if with_summary {
            names.reserve(SUMMARY_NAME);
        }

        let mut plan = Self::default();
        for rejection in job.rejections() {
            plan.failures
                .push(FailureLine::new(&rejection.source, &rejection.reason));
        }
        for entry in job.outcomes() {
            match entry.outcome {
                Outcome::Success(artifact) => plan.entries.push(ArchiveEntry {
                    name: names.claim(&artifact.name),
                    source: artifact.path,
                }),
                Outcome::Failure(failure) => plan
                    .failures
                    .push(FailureLine::new(&failure.url, &failure.reason)),
            }
        }
        if with_summary {
            plan.summary = Some(plan.summary_for(job));
        }
        plan
    }

    fn summary_for(&self, job: &Job) -> String {
        let selection = job.selection();
        let or_default = |value: Option<&String>| {
            value.map_or_else(|| "configured default".to_string(), String::clone)
        };

        let mut lines = vec![
            "batchfetch download summary".to_string(),
            "=".repeat(50),
            format!("Job ID: {}", job.id()),
            format!("Collection: {}", or_default(selection.and_then(|s| s.collection.as_ref()))),
            format!("Baseline: {}", or_default(selection.and_then(|s| s.baseline.as_ref()))),
            format!(
                "Products: {}",
                selection.map(|s| s.products.join(", ")).unwrap_or_default()
            ),
            format!("Submitted: {}", job.created_at().format("%Y-%m-%d %H:%M:%S UTC")),
            String::new(),
            "Statistics:".to_string(),
            format!("- Rows rejected: {}", job.rejections().len()),
            format!("- Total downloads: {}", job.total()),
            format!("- Successful downloads: {}", self.entries.len()),
            format!("- Failed downloads: {}", job.failed()),
        ];

        if !self.failures.is_empty() {
            lines.push(String::new());
            lines.push("Errors:".to_string());
            for failure in self.failures.iter().take(SUMMARY_MAX_ERRORS) {
                lines.push(format!("- {}: {}", failure.url, failure.message));
            }
            if self.failures.len() > SUMMARY_MAX_ERRORS {
                lines.push(format!(
                    "- ... {} more in {ERROR_REPORT_NAME}",
                    self.failures.len() - SUMMARY_MAX_ERRORS
                ));
            }
        }

        lines.push(String::new());
        lines.join("\n")
    }

    pub fn error_report(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let mut report = String::new();
        for line in &self.failures {
            report.push_str(&line.url);
            report.push('\t');
            report.push_str(&line.message);
            report.push('\n');
        }
        Some(report)
    }
}

/// Packages `job` into `destination`, replacing any previous archive there.
pub async fn package(job: &Job, destination: PathBuf) -> Result<PathBuf, PackagingError> {
    let plan = ArchivePlan::for_job(job);
    tokio::task::spawn_blocking(move || {
        write_archive(&plan, &destination)?;
        Ok::<_, PackagingError>(destination)
    })
    .await?
}

/// Blocking ZIP writer. The archive is staged next to `destination` and
/// renamed into place, so readers never see a partial file.
pub fn write_archive(plan: &ArchivePlan, destination: &Path) -> Result<(), PackagingError> {
    let parent = destination
        .parent()
        .ok_or_else(|| PackagingError::InvalidDestination(destination.to_path_buf()))?;
    std::fs::create_dir_all(parent)?;

    let staging = NamedTempFile::new_in(parent)?;
    let mut zip = ZipWriter::new(staging);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in &plan.entries {
        zip.start_file(entry.name.clone(), options)?;
        let mut source = File::open(&entry.source)?;
        io::copy(&mut source, &mut zip)?;
    }

    if let Some(report) = plan.error_report() {
        zip.start_file(ERROR_REPORT_NAME, options)?;
        zip.write_all(report.as_bytes())?;
    }

    if let Some(summary) = &plan.summary {
        zip.start_file(SUMMARY_NAME, options)?;
        zip.write_all(summary.as_bytes())?;
    }

    let staging = zip.finish()?;
    staging.persist(destination).map_err(|err| err.error)?;
    Ok(())
}

fn single_line(text: &str) -> String {
    text.replace(['\t', '\r', '\n'], " ")
}

/// Hands out unique entry names: `a.pdf`, then `a-2.pdf`, `a-3.pdf`, ...
#[derive(Debug, Default)]
struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, extension) = split_extension(name);
        let mut counter = 2;
        loop {
            let candidate = format!("{stem}-{counter}{extension}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    let file_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(file_start + dot),
        _ => (name, ""),
    }
}
