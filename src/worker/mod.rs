//! Fetch workers
//!
//! One streaming HTTP attempt per task. Concurrency is bounded by the job
//! coordinator, not here.

pub mod http;
pub mod runner;

pub use http::{DownloadError, HttpClient, HttpConfig};
