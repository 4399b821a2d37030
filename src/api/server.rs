use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{decompression::RequestDecompressionLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::{
    services::{cancel_job, health, job_result, job_status, purge_job, submit_job},
    state::AppState,
};
use crate::config::Config;
use crate::resolver::{OpenSearchResolver, ProductResolver};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Room for multipart boundaries and the small selection fields.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Builds the HTTP router for `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_bytes + FORM_OVERHEAD;

    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/{job_id}", get(job_status).delete(cancel_job))
        .route("/jobs/{job_id}/status", get(job_status))
        .route("/jobs/{job_id}/result", get(job_result).delete(purge_job))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        // Handles Content-Encoding (gzip) on uploads
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Runs the API server until SIGINT/SIGTERM.
///
/// `address` overrides `server.bind_addr` from the configuration.
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    info!(path = %config.server.work_dir.display(), "Preparing work directory");
    tokio::fs::create_dir_all(&config.server.work_dir)
        .await
        .map_err(|e| format!("Failed to create work directory: {}", e))?;

    let resolver = OpenSearchResolver::from_config(&config.archive, &config.fetch.user_agent)
        .map_err(|e| format!("Failed to build catalogue client: {}", e))?
        .map(|resolver| Arc::new(resolver) as Arc<dyn ProductResolver>);
    if resolver.is_none() {
        warn!("No catalogue credentials configured, timestamp uploads are disabled");
    }

    let sweep_interval = config.retention.sweep_interval();
    let state = AppState::new(config, resolver)
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

    state.registry.sweep_orphans(chrono::Utc::now()).await;

    let shutdown = CancellationToken::new();
    let sweeper = state.registry.clone().spawn_sweeper(
        sweep_interval,
        shutdown.clone(),
        state.metrics.clone(),
    );

    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "batchfetch API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        warn!(error = %err, "Sweeper task ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
