//! Configuration management for batchfetch
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use batchfetch::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `BATCHFETCH__<section>__<key>`
//!
//! Examples:
//! - `BATCHFETCH__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `BATCHFETCH__FETCH__POOL_SIZE=6`
//! - `BATCHFETCH__RETENTION__RETENTION_SECONDS=7200`
//!
//! Catalogue credentials are read from `archive.credentials_file` and can be
//! overridden with `BATCHFETCH_ARCHIVE_USERNAME` / `BATCHFETCH_ARCHIVE_PASSWORD`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/batchfetch.toml`.
//! This can be overridden using the `BATCHFETCH_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

// Re-export public types
pub use models::{ArchiveConfig, Config, Credentials, FetchConfig, RetentionConfig, ServerConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`BATCHFETCH__*`)
    /// 2. TOML file (default: `config/batchfetch.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_path(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration built in code.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
