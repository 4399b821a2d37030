use std::sync::Arc;

use crate::config::Config;
use crate::jobs::{Coordinator, JobRegistry};
use crate::observability::Metrics;
use crate::resolver::ProductResolver;
use crate::worker::DownloadError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<JobRegistry>,
    pub coordinator: Coordinator,
    /// Absent when no catalogue credentials are configured.
    pub resolver: Option<Arc<dyn ProductResolver>>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        resolver: Option<Arc<dyn ProductResolver>>,
    ) -> Result<Self, DownloadError> {
        let metrics = Arc::new(Metrics::new());
        let registry = Arc::new(JobRegistry::new(
            config.server.work_dir.clone(),
            config.retention.retention(),
        ));
        let coordinator = Coordinator::from_config(registry.clone(), &config.fetch, metrics.clone())?;

        Ok(Self {
            config: Arc::new(config),
            registry,
            coordinator,
            resolver,
            metrics,
        })
    }
}
