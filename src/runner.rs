//! Packaging containers of the source store, one at a time or as a batch.

use af_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assets::load_asset;
use crate::batch::{process_batch, BatchOptions, BatchProgress, BatchSummary, ItemOutcome};
use crate::packaging::{package_asset, PackageReport, PackagingEnv};

/// Load and package one container.
///
/// Returns the report when the packager ran, successful or not.
pub async fn package_container(
    env: &PackagingEnv,
    container: &str,
    cancel: &CancellationToken,
) -> Result<PackageReport> {
    let asset = load_asset(env.source.as_ref(), container).await?;
    package_asset(&asset, env, cancel).await
}

/// [`package_container`] mapped onto a batch outcome.
///
/// A missing container or manifest, or an asset with nothing to package,
/// is skipped. Faults after work on the asset has started, including a
/// packager that exits non-zero or rejects its arguments, mark the item
/// failed.
pub async fn package_item(
    env: &PackagingEnv,
    container: &str,
    cancel: &CancellationToken,
) -> Result<ItemOutcome> {
    match package_container(env, container, cancel).await {
        Ok(report) if report.success => Ok(ItemOutcome::Succeeded),
        Ok(report) => Ok(ItemOutcome::Failed(match report.exit_code {
            Some(code) => format!("packager exited with code {code}"),
            None => "packager was terminated".to_string(),
        })),
        Err(e) if e.is_skippable() => {
            tracing::warn!(container, error = %e, "Skipping asset");
            Ok(ItemOutcome::Skipped(e.to_string()))
        }
        Err(e @ Error::Validation(_)) => {
            tracing::error!(container, error = %e, "Asset failed");
            Ok(ItemOutcome::Failed(e.to_string()))
        }
        Err(e) => {
            if !e.is_cancelled() {
                tracing::error!(container, error = %e, "Asset failed");
            }
            Err(e)
        }
    }
}

/// Package every container of the source store, or only those in `only`.
pub async fn run_batch(
    env: PackagingEnv,
    only: Option<Vec<String>>,
    options: BatchOptions,
    cancel: &CancellationToken,
    progress: Option<mpsc::UnboundedSender<BatchProgress>>,
) -> Result<BatchSummary> {
    // An explicit list replaces enumeration.
    let containers = match &only {
        Some(_) => Vec::new(),
        None => env.source.containers().await?,
    };

    process_batch(
        containers,
        only,
        options,
        move |container: String, token: CancellationToken| {
            let env = env.clone();
            async move { package_item(&env, &container, &token).await }
        },
        cancel,
        progress,
    )
    .await
}
