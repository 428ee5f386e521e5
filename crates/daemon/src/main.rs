//! Conveyor - Main Entry Point
//! Durable queues whose messages trigger sandboxed wasm functions

mod logging;
mod settings;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use conveyor_core::application::{
    shutdown_channel, BindingRecovery, QueueService, QueueTriggerDispatcher,
};
use conveyor_core::port::id_provider::UuidProvider;
use conveyor_core::port::time_provider::SystemTimeProvider;
use conveyor_infra_fs::{FileBlobStore, FileQueueStore};
use conveyor_infra_sandbox::SandboxExecutor;
use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on waiting for workers after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let settings = Settings::load()?;

    // 2. Initialize logging
    let log_dir = settings.log_dir();
    let _log_guard = logging::init(&settings.log, log_dir.as_deref())?;

    info!("Conveyor v{} starting...", VERSION);

    let queue_options = settings.queue_options();
    let blob_dir = settings.blob_dir();
    let sandbox_config = settings.sandbox_config();
    info!(
        queue_dir = %queue_options.base_dir.display(),
        blob_dir = %blob_dir.display(),
        scratch_dir = %sandbox_config.scratch_dir.display(),
        overflow_policy = %queue_options.overflow_policy,
        "Configuration loaded"
    );
    tokio::fs::create_dir_all(&queue_options.base_dir).await?;

    // 3. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    let queues = Arc::new(FileQueueStore::new(queue_options, id_provider, time_provider));
    let blob_store = Arc::new(FileBlobStore::new(blob_dir));
    let executor = Arc::new(SandboxExecutor::new(blob_store.clone(), sandbox_config));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let dispatcher = Arc::new(QueueTriggerDispatcher::new(
        queues.clone(),
        executor,
        shutdown_rx.clone(),
        settings.worker_config(),
    ));
    let service = QueueService::new(queues, dispatcher.clone(), shutdown_rx);

    // 4. Rebuild bindings from module metadata
    info!("Restoring bindings...");
    let recovery = BindingRecovery::new(blob_store, dispatcher.clone());
    match recovery.restore_bindings().await {
        Ok(report) => info!(
            activated = report.activated,
            failed = report.failed,
            "Binding recovery completed"
        ),
        Err(e) => error!(error = ?e, "Binding recovery failed"),
    }

    match service.stats().await {
        Ok(stats) => {
            for queue in stats {
                info!(
                    queue = %queue.name,
                    message_count = queue.message_count,
                    total_bytes = queue.total_bytes,
                    "Queue ready"
                );
            }
        }
        Err(e) => warn!(error = ?e, "Failed to read queue stats"),
    }

    info!("System ready. Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown: cancel in-flight work, then join workers
    shutdown_tx.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.shutdown())
        .await
        .is_err()
    {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Workers did not stop in time");
    }

    info!("Shutdown complete.");
    Ok(())
}
