use super::models::{ArchiveConfig, Config, Credentials};
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_ENV_VAR: &str = "BATCHFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/batchfetch.toml";
const ENV_PREFIX: &str = "BATCHFETCH";
const ENV_SEPARATOR: &str = "__";

const USERNAME_ENV_VAR: &str = "BATCHFETCH_ARCHIVE_USERNAME";
const PASSWORD_ENV_VAR: &str = "BATCHFETCH_ARCHIVE_PASSWORD";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_path(config_path)
}

/// Same as [`load`] with an explicit config file path.
pub fn load_path(config_path: PathBuf) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config.archive);

    Ok(config)
}

/// Load catalogue credentials. Secrets never come from the main TOML file:
/// environment variables win, then the dedicated credentials file.
fn load_secrets(archive: &mut ArchiveConfig) {
    let from_file = read_credentials_file(&archive.credentials_file);

    archive.username = env::var(USERNAME_ENV_VAR)
        .ok()
        .or_else(|| from_file.as_ref().map(|c| c.username.clone()));
    archive.password = env::var(PASSWORD_ENV_VAR)
        .ok()
        .or_else(|| from_file.as_ref().map(|c| c.password.clone()));
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: Option<CredentialPair>,
    #[serde(flatten)]
    top_level: CredentialPair,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialPair {
    username: Option<String>,
    password: Option<String>,
}

/// Reads `[credentials] username/password` (or the same keys at top level).
/// A missing or unreadable file yields `None`.
pub(crate) fn read_credentials_file(path: &Path) -> Option<Credentials> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Cannot read credentials file");
            return None;
        }
    };

    let parsed: CredentialsFile = match toml::from_str(&content) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Malformed credentials file");
            return None;
        }
    };

    let pair = parsed.credentials.unwrap_or(parsed.top_level);
    match (pair.username, pair.password) {
        (Some(username), Some(password)) if !username.trim().is_empty() => {
            Some(Credentials { username, password })
        }
        _ => {
            tracing::warn!(path = %path.display(), "Credentials file lacks username or password");
            None
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // BATCHFETCH__FETCH__POOL_SIZE -> fetch.pool_size
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
