//! API models for the batchfetch upload and job endpoints.
//!
//! - `POST /jobs` accepts a CSV, either as the raw request body or as the
//!   `file` part of a `multipart/form-data` form, and answers with
//!   [`JobAcceptedResponse`]
//! - `GET /jobs/{job_id}` returns a [`JobSnapshot`]
//! - `GET /jobs/{job_id}/result` streams the finished ZIP archive
//! - `DELETE /jobs/{job_id}` cancels, `DELETE /jobs/{job_id}/result` drops a
//!   finished job and its files
//!
//! Product selection for timestamp uploads travels as query parameters
//! (`?products=ATL_NOM_1B,MSI_RGR_1C&baseline=BA`) or as form fields next
//! to the file.

use serde::{Deserialize, Serialize};

pub use crate::jobs::{InputMode, JobSnapshot, JobStatus};
use crate::observability::MetricsSnapshot;
use crate::resolver::ProductSelection;

/// Query parameters accepted by `POST /jobs`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UploadParams {
    /// Comma separated product identifiers.
    #[serde(default)]
    pub products: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub baseline: Option<String>,
}

impl UploadParams {
    pub fn into_selection(self) -> ProductSelection {
        let mut selection = ProductSelection {
            collection: non_empty(self.collection),
            baseline: non_empty(self.baseline),
            ..ProductSelection::default()
        };
        if let Some(products) = self.products.as_deref() {
            add_products(&mut selection, products);
        }
        selection
    }
}

/// Appends comma separated product ids, skipping blanks and duplicates.
pub(crate) fn add_products(selection: &mut ProductSelection, list: &str) {
    for product in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !selection.products.iter().any(|known| known == product) {
            selection.products.push(product.to_string());
        }
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Response for an accepted upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub mode: InputMode,
    /// Download tasks scheduled for the job. Timestamp uploads report 0
    /// here; their totals appear on the status endpoint once resolved.
    pub total: usize,
    /// Rows that were rejected before any download started.
    pub rejected: usize,
}

impl From<&JobSnapshot> for JobAcceptedResponse {
    fn from(snapshot: &JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            mode: snapshot.mode,
            total: snapshot.total,
            rejected: snapshot.rejected,
        }
    }
}

/// Error payload
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Jobs currently held by the registry.
    pub jobs: usize,
    /// Whether timestamp uploads can be resolved.
    pub timestamp_uploads: bool,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_into_selection() {
        let params = UploadParams {
            products: Some("ATL_NOM_1B, MSI_RGR_1C,,ATL_NOM_1B".into()),
            collection: Some("  ".into()),
            baseline: Some("AE".into()),
        };

        let selection = params.into_selection();
        assert_eq!(selection.products, vec!["ATL_NOM_1B", "MSI_RGR_1C"]);
        assert_eq!(selection.collection, None);
        assert_eq!(selection.baseline.as_deref(), Some("AE"));
    }

    #[test]
    fn test_accepted_response_serialization() {
        let response = JobAcceptedResponse {
            job_id: "job-1".into(),
            mode: InputMode::Timestamp,
            total: 4,
            rejected: 1,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "timestamp");
        assert_eq!(json["total"], 4);
    }
}
