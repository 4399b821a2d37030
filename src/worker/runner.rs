//! Task runner - performs one download attempt for a task

use std::path::Path;

use tracing::{debug, warn};
use url::Url;

use super::http::HttpClient;
use crate::jobs::{Artifact, Outcome, Task};

/// Fetches `task` into `job_dir` and turns every result into an [`Outcome`].
pub async fn attempt(client: &HttpClient, index: usize, task: &Task, job_dir: &Path) -> Outcome {
    let name = derive_file_name(task, index);
    let path = job_dir.join(format!("{index:05}.download"));

    debug!(index, url = %task.url, "Fetching");

    match client.download_to(&task.url, &task.headers, &path).await {
        Ok(bytes) => {
            debug!(index, url = %task.url, bytes, name = %name, "Fetched");
            Outcome::Success(Artifact { name, path, bytes })
        }
        Err(err) => {
            warn!(index, url = %task.url, error = %err, "Fetch failed");
            remove_partial(&path).await;
            Outcome::failure(task.url.clone(), err.into())
        }
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove partial download"),
    }
}

/// Archive entry name for a task: its display name, else the last URL path
/// segment, else `download_<n>` with `n` counted from one.
pub fn derive_file_name(task: &Task, index: usize) -> String {
    task.name
        .as_deref()
        .and_then(sanitize_name)
        .or_else(|| name_from_url(&task.url))
        .unwrap_or_else(|| format!("download_{}", index + 1))
}

/// Cleans a relative entry name. Directory separators are kept between
/// components; empty, `.` and `..` components are dropped.
pub fn sanitize_name(name: &str) -> Option<String> {
    let parts: Vec<String> = name.split(['/', '\\']).filter_map(sanitize_component).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn name_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    sanitize_component(&decoded)
}

fn sanitize_component(part: &str) -> Option<String> {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}
