//! Helpers for spawning managed background loops
//!
//! These helpers give every long-running loop the same lifecycle:
//! start/stop logging, graceful shutdown through a cancellation token,
//! and application shutdown when a loop fails unexpectedly.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawn a background loop with consistent lifecycle management.
///
/// The loop's failure cancels the application token so the rest of the
/// service winds down instead of running degraded.
pub fn spawn_managed_task<F>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_future: F,
) where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    let task_token = app_token.clone();

    tracker.spawn(async move {
        match task_future.await {
            Ok(()) => {
                info!(task = task_name, "Background task completed");
            }
            Err(e) => {
                error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                task_token.cancel();
            }
        }
    });
}

/// Spawn a background loop that receives its own cancellation token.
///
/// The loop observes the token for graceful shutdown; an unexpected
/// failure cancels the application token.
pub fn spawn_cancellable_task<F, Fut>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_builder: F,
) where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task_token = app_token.clone();
    let cancel_token = app_token.clone();

    tracker.spawn(async move {
        tokio::select! {
            result = task_builder(cancel_token.clone()) => {
                match result {
                    Ok(()) => {
                        info!("Background task completed");
                    }
                    Err(e) => {
                        error!(error = ?e, "Background task failed unexpectedly");
                        task_token.cancel();
                    }
                }
            }
            () = task_token.cancelled() => {
                info!("Background task shutting down gracefully");
            }
        }
    });
}
