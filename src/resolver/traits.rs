use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::jobs::{HeadersMap, Task};

/// Catalogue resolver errors
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("catalogue request failed: {0}")]
    Request(String),
    #[error("catalogue returned HTTP {0}")]
    HttpStatus(u16),
    #[error("unreadable catalogue response: {0}")]
    InvalidResponse(String),
}

/// One timestamp row to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductQuery {
    pub timestamp: DateTime<Utc>,
    pub products: Vec<String>,
    pub orbit: Option<u32>,
    /// Overrides the resolver's configured collection.
    pub collection: Option<String>,
    /// Overrides the resolver's configured baseline.
    pub baseline: Option<String>,
}

/// A downloadable product found by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLink {
    pub url: String,
    /// Suggested archive entry name, may contain a directory prefix.
    pub file_name: String,
    pub headers: HeadersMap,
}

impl ProductLink {
    pub fn into_task(self) -> Task {
        Task::new(self.url)
            .with_name(self.file_name)
            .with_headers(self.headers)
    }
}

/// Maps a timestamp to downloadable products.
///
/// Implementations may perform network I/O. An empty result is not an error.
#[async_trait]
pub trait ProductResolver: Send + Sync {
    async fn resolve(&self, query: &ProductQuery) -> Result<Vec<ProductLink>, ResolverError>;
}
