//! API utility functions
//!
//! Pure helpers for upload request processing, kept out of services.rs so
//! they can be unit tested.

use crate::api::error::ApiError;

/// How an upload carries its CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// `multipart/form-data` with a `file` part.
    Multipart,
    /// The request body is the CSV itself.
    Csv,
}

/// Parses the Content-Type header of an upload.
///
/// Accepts `multipart/form-data` plus the media types browsers and `curl`
/// send for CSV files: `text/csv`, `text/plain`, `application/csv`,
/// `application/vnd.ms-excel` and `application/octet-stream`.
pub fn parse_upload_type(content_type: &str) -> Result<UploadKind, ApiError> {
    let media_type: mime::Mime = content_type.parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;

    let type_ = media_type.type_();
    let subtype = media_type.subtype();

    if type_ == mime::MULTIPART && subtype == mime::FORM_DATA {
        return Ok(UploadKind::Multipart);
    }
    if type_ == mime::TEXT && (subtype == mime::CSV || subtype == mime::PLAIN) {
        return Ok(UploadKind::Csv);
    }
    if type_ == mime::APPLICATION
        && (subtype == mime::CSV
            || subtype == mime::OCTET_STREAM
            || subtype.as_str() == "vnd.ms-excel")
    {
        return Ok(UploadKind::Csv);
    }

    Err(ApiError::InvalidPayload(format!(
        "Content-Type must be multipart/form-data or text/csv, got: {}/{}",
        type_, subtype
    )))
}

/// Checks the uploaded file name, when the client sent one.
pub fn validate_file_name(file_name: Option<&str>) -> Result<(), ApiError> {
    match file_name {
        None | Some("") => Ok(()),
        Some(name) if name.to_ascii_lowercase().ends_with(".csv") => Ok(()),
        Some(name) => Err(ApiError::InvalidPayload(format!(
            "only CSV files are accepted, got: {name}"
        ))),
    }
}

/// Validates that body size does not exceed the maximum allowed size
pub fn validate_body_size(data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if data.len() > max_size {
        return Err(ApiError::PayloadTooLarge(data.len()));
    }
    Ok(())
}
