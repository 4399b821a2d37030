//! CSV row resolution
//!
//! Turns an uploaded CSV into a [`Batch`]: direct URLs become tasks as they
//! are, timestamps are looked up in the product catalogue through a
//! [`ProductResolver`]. Rows that cannot become tasks are kept as rejections
//! so they show up in the job's error report.
//!
//! Preparing a batch only parses and validates, so it is cheap enough to run
//! inside the upload request. Catalogue lookups happen later, in the job's
//! own task, through [`PendingLookup::resolve`].

pub mod archive;
pub mod catalogue;
pub mod rows;
pub mod traits;

pub use archive::OpenSearchResolver;
pub use rows::{ParsedInput, Row};
pub use traits::{ProductLink, ProductQuery, ProductResolver, ResolverError};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jobs::{Batch, FailureReason, InputMode, Rejection, Task};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("timestamp uploads need catalogue credentials, none are configured")]
    ArchiveUnavailable,
}

/// Products to look up for timestamp uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductSelection {
    pub products: Vec<String>,
    pub collection: Option<String>,
    pub baseline: Option<String>,
}

impl ProductSelection {
    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.products.is_empty() {
            return Err(ResolveError::MalformedInput(
                "select at least one product for timestamp uploads".to_string(),
            ));
        }
        let unknown: Vec<&str> = self
            .products
            .iter()
            .map(String::as_str)
            .filter(|product| !catalogue::is_known_product(product))
            .collect();
        if !unknown.is_empty() {
            return Err(ResolveError::MalformedInput(format!(
                "unknown products: {}",
                unknown.join(", ")
            )));
        }
        if let Some(collection) = self.collection.as_deref() {
            if !catalogue::is_known_collection(collection) {
                return Err(ResolveError::MalformedInput(format!(
                    "unknown collection: {collection}"
                )));
            }
        }
        if let Some(baseline) = self.baseline.as_deref() {
            if !catalogue::is_known_baseline(baseline) {
                return Err(ResolveError::MalformedInput(format!(
                    "unknown baseline: {baseline}"
                )));
            }
        }
        Ok(())
    }

    fn query(&self, row_time: DateTime<Utc>, orbit: Option<u32>) -> ProductQuery {
        ProductQuery {
            timestamp: row_time,
            products: self.products.clone(),
            orbit,
            collection: self.collection.clone(),
            baseline: self.baseline.clone(),
        }
    }
}

/// A timestamp row waiting for its catalogue lookup.
#[derive(Debug, Clone)]
struct Lookup {
    line: usize,
    raw: String,
    at: DateTime<Utc>,
    orbit: Option<u32>,
}

/// An accepted upload.
pub enum PreparedBatch {
    /// Every row is already a task or a rejection.
    Ready(Batch),
    /// Timestamp rows still need catalogue lookups.
    Lookup(PendingLookup),
}

pub struct PendingLookup {
    batch: Batch,
    lookups: Vec<Lookup>,
    selection: ProductSelection,
    resolver: Arc<dyn ProductResolver>,
}

impl PendingLookup {
    pub fn selection(&self) -> &ProductSelection {
        &self.selection
    }

    /// Rows waiting for a lookup.
    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Looks up every timestamp row, one after another. Once `cancel` fires
    /// the remaining rows are rejected as cancelled. Rejections come back in
    /// row order.
    pub async fn resolve(self, cancel: &CancellationToken) -> Batch {
        let PendingLookup {
            mut batch,
            lookups,
            selection,
            resolver,
        } = self;

        for lookup in lookups {
            let Lookup {
                line,
                raw,
                at,
                orbit,
            } = lookup;
            let query = selection.query(at, orbit);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = resolver.resolve(&query) => Some(result),
            };

            match result {
                None => batch.rejections.push(Rejection {
                    line,
                    source: raw,
                    reason: FailureReason::Cancelled,
                }),
                Some(Ok(links)) if links.is_empty() => {
                    debug!(line, timestamp = %raw, "No products found");
                    batch.rejections.push(Rejection {
                        line,
                        source: raw,
                        reason: FailureReason::NoProductsFound,
                    });
                }
                Some(Ok(links)) => batch
                    .tasks
                    .extend(links.into_iter().map(ProductLink::into_task)),
                Some(Err(err)) => {
                    warn!(line, timestamp = %raw, error = %err, "Row resolution failed");
                    batch.rejections.push(Rejection {
                        line,
                        source: raw,
                        reason: FailureReason::Resolution(err.to_string()),
                    });
                }
            }
        }

        batch.rejections.sort_by_key(|rejection| rejection.line);
        batch
    }
}

/// Parses `input` and checks that it can be resolved.
///
/// Fails as a whole only for malformed input, or for timestamp input with no
/// resolver available. Per-row problems never abort the batch.
pub fn prepare_batch(
    input: &[u8],
    selection: &ProductSelection,
    resolver: Option<Arc<dyn ProductResolver>>,
) -> Result<PreparedBatch, ResolveError> {
    let parsed = rows::parse(input)?;

    let mut batch = Batch {
        mode: parsed.mode,
        ..Batch::default()
    };
    let mut lookups = Vec::new();
    for row in parsed.rows {
        match row {
            Row::Url { url, name, .. } => {
                let task = Task::new(url);
                batch.tasks.push(match name {
                    Some(name) => task.with_name(name),
                    None => task,
                });
            }
            Row::Rejected(rejection) => batch.rejections.push(rejection),
            Row::Timestamp {
                line,
                raw,
                at,
                orbit,
            } => lookups.push(Lookup {
                line,
                raw,
                at,
                orbit,
            }),
        }
    }

    match parsed.mode {
        InputMode::Direct => Ok(PreparedBatch::Ready(batch)),
        InputMode::Timestamp => {
            selection.validate()?;
            let resolver = resolver.ok_or(ResolveError::ArchiveUnavailable)?;
            batch.selection = Some(selection.clone());
            Ok(PreparedBatch::Lookup(PendingLookup {
                batch,
                lookups,
                selection: selection.clone(),
                resolver,
            }))
        }
    }
}
