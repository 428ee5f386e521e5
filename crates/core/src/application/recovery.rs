// Binding recovery on daemon startup
use crate::application::dispatcher::QueueTriggerDispatcher;
use crate::port::BlobStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of a startup reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub activated: usize,
    pub failed: usize,
}

/// Startup reconciliation service
///
/// Bindings live in memory only. On daemon startup they are rebuilt from the
/// `trigger-queue` metadata stored alongside each code module.
pub struct BindingRecovery {
    blob_store: Arc<dyn BlobStore>,
    dispatcher: Arc<QueueTriggerDispatcher>,
}

impl BindingRecovery {
    pub fn new(blob_store: Arc<dyn BlobStore>, dispatcher: Arc<QueueTriggerDispatcher>) -> Self {
        Self {
            blob_store,
            dispatcher,
        }
    }

    /// Re-activate every binding recorded in blob metadata
    ///
    /// A failing binding is logged and counted; it never aborts the pass.
    /// Only a failure to list the blob store is returned as an error.
    pub async fn restore_bindings(&self) -> crate::error::Result<RecoveryReport> {
        info!("Starting binding recovery");

        let descriptors = self.blob_store.list().await?;
        let mut report = RecoveryReport::default();

        for descriptor in descriptors {
            let Some(queue) = descriptor.info.trigger_queue() else {
                continue;
            };
            let function = descriptor.info.trigger_function();

            match self.dispatcher.activate(&descriptor.id, function, queue).await {
                Ok(()) => {
                    info!(
                        function_blob_id = %descriptor.id,
                        function = %function,
                        queue = %queue,
                        "Binding restored"
                    );
                    report.activated += 1;
                }
                Err(e) if e.is_backpressure() => {
                    warn!(function_blob_id = %descriptor.id, error = %e, "Binding restore deferred by backpressure");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(function_blob_id = %descriptor.id, error = %e, "Failed to restore binding");
                    report.failed += 1;
                }
            }
        }

        info!(
            activated = %report.activated,
            failed = %report.failed,
            "Binding recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::{shutdown_channel, WorkerConfig};
    use crate::domain::{BlobInfo, FUNCTION_NAME_KEY, TRIGGER_QUEUE_KEY};
    use crate::port::blob_store::mocks::InMemoryBlobStore;
    use crate::port::function_executor::mocks::RecordingExecutor;
    use crate::port::message_queue::mocks::RecordingQueue;

    fn dispatcher() -> (crate::application::worker::ShutdownSender, Arc<QueueTriggerDispatcher>) {
        let (tx, token) = shutdown_channel();
        let dispatcher = QueueTriggerDispatcher::new(
            Arc::new(RecordingQueue::new()),
            Arc::new(RecordingExecutor::new_success()),
            token,
            WorkerConfig::default(),
        );
        (tx, Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_restores_only_triggered_modules() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.insert(
            "resize",
            vec![0],
            BlobInfo::new("resize.wasm", "application/wasm")
                .with_metadata(TRIGGER_QUEUE_KEY, "images")
                .with_metadata(FUNCTION_NAME_KEY, "handle"),
        );
        blobs.insert(
            "notify",
            vec![0],
            BlobInfo::new("notify.wasm", "application/wasm").with_metadata(TRIGGER_QUEUE_KEY, "mail"),
        );
        blobs.insert(
            "library",
            vec![0],
            BlobInfo::new("lib.wasm", "application/wasm"),
        );

        let (_tx, dispatcher) = dispatcher();
        let recovery = BindingRecovery::new(blobs, dispatcher.clone());

        let report = recovery.restore_bindings().await.unwrap();
        assert_eq!(report, RecoveryReport { activated: 2, failed: 0 });

        let bindings = dispatcher.bindings().await;
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].function_blob_id, "notify");
        assert_eq!(bindings[0].function_name, "run");
        assert_eq!(bindings[1].function_name, "handle");
        assert_eq!(bindings[1].queue.as_str(), "images");

        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_binding_is_counted_not_fatal() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs.insert(
            "broken",
            vec![0],
            BlobInfo::new("x.wasm", "application/wasm").with_metadata(TRIGGER_QUEUE_KEY, ".."),
        );
        blobs.insert(
            "good",
            vec![0],
            BlobInfo::new("y.wasm", "application/wasm").with_metadata(TRIGGER_QUEUE_KEY, "jobs"),
        );

        let (_tx, dispatcher) = dispatcher();
        let report = BindingRecovery::new(blobs, dispatcher.clone())
            .restore_bindings()
            .await
            .unwrap();

        assert_eq!(report, RecoveryReport { activated: 1, failed: 1 });
        dispatcher.shutdown().await;
    }
}
