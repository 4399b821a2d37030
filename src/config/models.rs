use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for per-job download directories and result archives
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            work_dir: default_work_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("data/jobs")
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024 // 5 MB
}

/// Fetch worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Concurrent fetches per job
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Whole-request timeout for a single fetch
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Cancels a job that runs longer than this. Unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_deadline_seconds: Option<u64>,
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_seconds.map(Duration::from_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            user_agent: default_user_agent(),
            job_deadline_seconds: None,
        }
    }
}

fn default_pool_size() -> usize {
    3
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("batchfetch/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Idle time after which a finished job and its files are evicted
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval_seconds(),
            retention_seconds: default_retention_seconds(),
        }
    }
}

fn default_sweep_interval_seconds() -> u64 {
    1800
}

fn default_retention_seconds() -> u64 {
    3600
}

/// Product catalogue configuration (timestamp uploads)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_catalogue_url")]
    pub catalogue_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_baseline")]
    pub baseline: String,
    /// Search window half-width around each timestamp
    #[serde(default = "default_time_tolerance_minutes")]
    pub time_tolerance_minutes: u32,
    #[serde(default = "default_max_records")]
    pub max_records: u32,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    /// Catalogue username (loaded from credentials file or environment)
    #[serde(skip)]
    pub username: Option<String>,
    /// Catalogue password (loaded from credentials file or environment)
    #[serde(skip)]
    pub password: Option<String>,
}

impl ArchiveConfig {
    /// Both halves of the credentials, if loaded.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            catalogue_url: default_catalogue_url(),
            collection: default_collection(),
            baseline: default_baseline(),
            time_tolerance_minutes: default_time_tolerance_minutes(),
            max_records: default_max_records(),
            credentials_file: default_credentials_file(),
            username: None,
            password: None,
        }
    }
}

fn default_catalogue_url() -> String {
    "https://eocat.esa.int/eo-catalogue".to_string()
}

fn default_collection() -> String {
    "EarthCAREL2Validated".to_string()
}

fn default_baseline() -> String {
    "BA".to_string()
}

fn default_time_tolerance_minutes() -> u32 {
    11
}

fn default_max_records() -> u32 {
    100
}

fn default_credentials_file() -> PathBuf {
    PathBuf::from("oads_credentials.toml")
}

/// Catalogue login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.fetch.pool_size, 3);
        assert_eq!(config.fetch.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.fetch.job_deadline(), None);
        assert_eq!(config.retention.sweep_interval(), Duration::from_secs(1800));
        assert_eq!(config.retention.retention(), Duration::from_secs(3600));
        assert_eq!(config.archive.time_tolerance_minutes, 11);
        assert_eq!(config.archive.max_records, 100);
    }

    #[test]
    fn test_credentials_need_both_halves() {
        let mut archive = ArchiveConfig::default();
        assert!(archive.credentials().is_none());

        archive.username = Some("user@example.com".into());
        assert!(archive.credentials().is_none());

        archive.password = Some("secret".into());
        let credentials = archive.credentials().unwrap();
        assert_eq!(credentials.username, "user@example.com");
        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
