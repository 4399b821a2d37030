//! One-shot batch run from the command line.

use std::sync::Arc;
use std::time::Duration;

use batchfetch::config::Config;
use batchfetch::jobs::{Coordinator, JobRegistry, JobStatus};
use batchfetch::observability::Metrics;
use batchfetch::resolver::{OpenSearchResolver, ProductResolver, ProductSelection, prepare_batch};
use tracing::{info, warn};

use crate::cli::RunArgs;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(config: Config, args: RunArgs) -> Result<(), AnyError> {
    let input = tokio::fs::read(&args.input)
        .await
        .map_err(|e| format!("Failed to read {}: {}", args.input.display(), e))?;

    let selection = ProductSelection {
        products: args.products,
        collection: args.collection,
        baseline: args.baseline,
    };
    let resolver: Option<Arc<dyn ProductResolver>> =
        OpenSearchResolver::from_config(&config.archive, &config.fetch.user_agent)?
            .map(|resolver| Arc::new(resolver) as Arc<dyn ProductResolver>);

    let prepared = prepare_batch(&input, &selection, resolver)?;

    // Downloads are staged in a scratch directory that goes away with the run.
    let scratch = tempfile::tempdir()?;
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(JobRegistry::new(scratch.path(), config.retention.retention()));
    let coordinator = Coordinator::from_config(registry, &config.fetch, metrics.clone())?;

    let job = coordinator.submit_prepared(prepared);
    info!(job_id = %job.id(), mode = ?job.mode(), "Batch started");

    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
    progress.tick().await;

    let status = loop {
        tokio::select! {
            status = job.wait_finished() => break status,
            _ = progress.tick() => {
                info!(completed = job.completed(), total = job.total(), failed = job.failed(), "Progress");
            }
            result = tokio::signal::ctrl_c(), if !job.is_cancel_requested() => {
                if let Err(err) = result {
                    warn!(error = %err, "Failed to listen for Ctrl+C");
                }
                warn!("Interrupted, cancelling remaining downloads");
                job.cancel();
            }
        }
    };

    let snapshot = job.snapshot();
    let archive = job
        .archive_path()
        .ok_or_else(|| format!("Job {status:?}: {}", snapshot.error.unwrap_or_default()))?;

    tokio::fs::copy(&archive, &args.output)
        .await
        .map_err(|e| format!("Failed to write {}: {}", args.output.display(), e))?;

    info!(
        output = %args.output.display(),
        status = ?status,
        completed = snapshot.completed,
        failed = snapshot.failed,
        rejected = snapshot.rejected,
        "Archive written"
    );

    if status != JobStatus::Completed {
        return Err(format!("Job ended as {status:?}").into());
    }
    Ok(())
}
