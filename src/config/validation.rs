use super::models::{ArchiveConfig, Config};
use crate::resolver::catalogue;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("fetch.pool_size must be at least 1")]
    ZeroPoolSize,

    #[error("Duration must be positive: {field} = 0")]
    ZeroDuration { field: &'static str },

    #[error("server.max_upload_bytes must be positive")]
    ZeroUploadLimit,

    #[error("Unknown archive collection '{0}'")]
    UnknownCollection(String),

    #[error("Unknown archive baseline '{0}'")]
    UnknownBaseline(String),

    #[error("Invalid archive.catalogue_url '{url}': {reason}")]
    InvalidCatalogueUrl { url: String, reason: String },

    #[error("archive.max_records must be positive")]
    ZeroMaxRecords,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_fetch(config)?;
    validate_retention(config)?;
    validate_archive(&config.archive)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_upload_bytes == 0 {
        return Err(ValidationError::ZeroUploadLimit);
    }
    Ok(())
}

fn validate_fetch(config: &Config) -> Result<(), ValidationError> {
    let fetch = &config.fetch;
    if fetch.pool_size == 0 {
        return Err(ValidationError::ZeroPoolSize);
    }
    if fetch.timeout_seconds == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "fetch.timeout_seconds",
        });
    }
    if fetch.connect_timeout_seconds == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "fetch.connect_timeout_seconds",
        });
    }
    if fetch.job_deadline_seconds == Some(0) {
        return Err(ValidationError::ZeroDuration {
            field: "fetch.job_deadline_seconds",
        });
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.sweep_interval_seconds == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "retention.sweep_interval_seconds",
        });
    }
    if config.retention.retention_seconds == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "retention.retention_seconds",
        });
    }
    Ok(())
}

fn validate_archive(archive: &ArchiveConfig) -> Result<(), ValidationError> {
    if !catalogue::is_known_collection(&archive.collection) {
        return Err(ValidationError::UnknownCollection(archive.collection.clone()));
    }
    if !catalogue::is_known_baseline(&archive.baseline) {
        return Err(ValidationError::UnknownBaseline(archive.baseline.clone()));
    }
    if archive.time_tolerance_minutes == 0 {
        return Err(ValidationError::ZeroDuration {
            field: "archive.time_tolerance_minutes",
        });
    }
    if archive.max_records == 0 {
        return Err(ValidationError::ZeroMaxRecords);
    }
    match Url::parse(&archive.catalogue_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(ValidationError::InvalidCatalogueUrl {
            url: archive.catalogue_url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(err) => Err(ValidationError::InvalidCatalogueUrl {
            url: archive.catalogue_url.clone(),
            reason: err.to_string(),
        }),
    }
}
