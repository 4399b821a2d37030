use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::{
    error::ApiError,
    models::{HealthResponse, JobAcceptedResponse, UploadParams, add_products, non_empty},
    state::AppState,
    utils::{UploadKind, parse_upload_type, validate_body_size, validate_file_name},
};
use crate::resolver::{ProductSelection, prepare_batch};

/// Upload endpoint (POST /jobs)
///
/// Accepts the CSV as the raw body (`text/csv`) or as the `file` part of a
/// `multipart/form-data` form. The whole file is parsed and validated before
/// the job is created, so a malformed upload never produces a job.
///
/// ## Flow:
/// 1. Classify the upload by Content-Type, read it and enforce the size limit
/// 2. Merge product selection from query parameters and form fields
/// 3. Parse rows into download tasks, rejected rows and pending lookups
/// 4. Register the job and start it in the background; catalogue lookups for
///    timestamp rows happen there, while the job is Pending
/// 5. Return 202 Accepted with the job id
pub async fn submit_job(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;

    let max_size = state.config.server.max_upload_bytes;
    let mut selection = params.into_selection();

    let input = match parse_upload_type(content_type)? {
        UploadKind::Csv => read_body(request.into_body(), max_size).await?,
        UploadKind::Multipart => {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|rejection| ApiError::InvalidPayload(rejection.body_text()))?;
            read_form(multipart, &mut selection, max_size).await?
        }
    };

    let prepared = prepare_batch(&input, &selection, state.resolver.clone())?;
    let job = state.coordinator.submit_prepared(prepared);
    let response = JobAcceptedResponse::from(&job.snapshot());

    info!(
        job_id = %response.job_id,
        mode = ?response.mode,
        total = response.total,
        rejected = response.rejected,
        "Upload accepted"
    );

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Reads the multipart form: the `file` part plus optional product
/// selection fields (`products`, repeated `product`, `product_<ID>=on`,
/// `collection`, `baseline`).
async fn read_form(
    mut multipart: Multipart,
    selection: &mut ProductSelection,
    max_size: usize,
) -> Result<Vec<u8>, ApiError> {
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(map_multipart_error(max_size))? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "file" => {
                validate_file_name(field.file_name())?;
                let data = field.bytes().await.map_err(map_multipart_error(max_size))?;
                validate_body_size(&data, max_size)?;
                file = Some(data.to_vec());
            }
            "products" | "product" => {
                let value = field.text().await.map_err(map_multipart_error(max_size))?;
                add_products(selection, &value);
            }
            "collection" => {
                let value = field.text().await.map_err(map_multipart_error(max_size))?;
                selection.collection = non_empty(Some(value)).or(selection.collection.take());
            }
            "baseline" => {
                let value = field.text().await.map_err(map_multipart_error(max_size))?;
                selection.baseline = non_empty(Some(value)).or(selection.baseline.take());
            }
            other => match other.strip_prefix("product_") {
                Some(product) => {
                    let value = field.text().await.map_err(map_multipart_error(max_size))?;
                    if matches!(value.trim(), "on" | "true" | "1") {
                        add_products(selection, product);
                    }
                }
                None => debug!(field = other, "Ignoring unknown form field"),
            },
        }
    }

    file.ok_or_else(|| ApiError::InvalidPayload("form has no `file` part".into()))
}

fn map_multipart_error(max_size: usize) -> impl Fn(axum::extract::multipart::MultipartError) -> ApiError {
    move |err| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(max_size)
        } else {
            ApiError::InvalidPayload(err.body_text())
        }
    }
}

/// Reads request body and validates size
///
/// Decompression is handled by RequestDecompressionLayer, so this receives
/// already-decompressed data. Reading stops as soon as the limit is passed.
async fn read_body(body: Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = Limited::new(body, max_size)
        .collect()
        .await
        .map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge(max_size)
            } else {
                ApiError::InvalidPayload(err.to_string())
            }
        })?
        .to_bytes()
        .to_vec();

    validate_body_size(&data, max_size)?;

    Ok(data)
}

/// Job status endpoint (GET /jobs/{job_id})
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.coordinator.status(&job_id)?;
    Ok((StatusCode::OK, Json(snapshot)))
}

/// Archive download endpoint (GET /jobs/{job_id}/result)
///
/// Streams the ZIP once the job has one. Every download refreshes the job's
/// retention window.
pub async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.registry.get(&job_id)?;
    let path = job
        .archive_path()
        .ok_or_else(|| ApiError::NotFound(format!("result for job {job_id} is not ready")))?;

    let file = tokio::fs::File::open(&path).await.map_err(|err| {
        warn!(job_id = %job_id, path = %path.display(), error = %err, "Archive missing on disk");
        ApiError::NotFound(format!("result for job {job_id}"))
    })?;
    state.registry.touch(&job_id)?;

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"batchfetch_{job_id}.zip\""),
        ),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))))
}

/// Cancel endpoint (DELETE /jobs/{job_id})
///
/// Already running fetches finish; remaining tasks are reported as cancelled.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.coordinator.cancel(&job_id)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// Cleanup endpoint (DELETE /jobs/{job_id}/result)
///
/// Drops a finished job and its files ahead of the retention sweep.
pub async fn purge_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.remove(&job_id).await?;
    info!(job_id = %job_id, "Job purged");
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs: state.registry.len(),
        timestamp_uploads: state.resolver.is_some(),
        metrics: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}
