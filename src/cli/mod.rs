//! Command-line helpers for the `machinery` binary.

mod progress;

use std::sync::Arc;

pub use progress::{format_bytes, format_duration, print_caches, print_summary};

use crate::cache::{CacheNames, summarize};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::registration::{RegistrationOutcome, SCRIPT_URL, ServiceWorkerContainer};
use crate::stats::WarmUpSummary;
use crate::storage::{CacheStorage, DiskStorage};
use crate::warmup::CompletionTarget;
use crate::worker::{CacheWorker, WorkerScript};

/// Installs the configured worker against the upstream and runs one
/// warm-up pass with a progress bar.
///
/// # Errors
///
/// Returns an error if the worker cannot be installed or activated.
pub async fn run_warm(config: &AppConfig) -> Result<WarmUpSummary> {
    let container = ServiceWorkerContainer::from_config(config)?;
    let worker = activate(&container, config).await?;

    let (id, rx) = container.connect("machinery://cli");
    let bar = progress::make_warm_bar(worker.manifest().media.len() as u64);
    let reporter = tokio::spawn(progress::report_progress(rx, bar.clone()));

    let summary = worker
        .warm_up(CompletionTarget::Client(id))
        .await
        .unwrap_or_default();
    container.disconnect(id);
    if let Err(e) = reporter.await {
        log::warn!("Progress reporter stopped: {e}");
    }
    bar.finish_and_clear();

    Ok(summary)
}

async fn activate(container: &ServiceWorkerContainer, config: &AppConfig) -> Result<Arc<CacheWorker>> {
    // The pass is driven here so completion reaches this page.
    let script = WorkerScript::new(
        config.worker.clone().with_warm_on_activate(false),
        config.manifest.clone(),
    );
    match container.register(SCRIPT_URL, script).await? {
        RegistrationOutcome::Activated { worker, report, .. } => {
            for name in &report.removed {
                println!("Removed old cache {name}");
            }
            Ok(worker)
        }
        RegistrationOutcome::Unchanged(worker) => Ok(worker),
        RegistrationOutcome::InstallFailed {
            error,
            active: Some(worker),
        } => {
            log::warn!("Install failed ({error}); warming the stored worker {}", worker.id());
            Ok(worker)
        }
        RegistrationOutcome::InstallFailed { error, active: None } => Err(error),
    }
}

/// Prints every cache under the configured cache directory.
///
/// # Errors
///
/// Returns an error if the cache directory cannot be read.
pub async fn list_caches(config: &AppConfig) -> Result<()> {
    let storage = DiskStorage::new(config.paths.cache_dir.clone());
    let names = CacheNames::new(
        &config.worker.cache_prefix,
        &config.worker.shell_version,
        &config.worker.media_version,
    );
    let caches = summarize(&storage as &dyn CacheStorage, Some(&names)).await?;
    println!("Caches in {}", storage.root().display());
    print_caches(&caches);
    Ok(())
}

/// Prints a warm-up summary and turns a pass with failures into an error
/// for the exit code.
///
/// # Errors
///
/// Returns [`Error::Network`] if any recording could not be cached.
pub fn report(summary: &WarmUpSummary) -> Result<()> {
    print_summary(summary);
    if summary.assets_failed > 0 {
        return Err(Error::Network(format!(
            "{} recording(s) could not be cached",
            summary.assets_failed
        )));
    }
    Ok(())
}
