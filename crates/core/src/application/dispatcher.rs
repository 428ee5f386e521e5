// Queue Trigger Dispatcher
// One supervised consumer task per active queue→function binding

use crate::application::worker::{QueueConsumer, ShutdownToken, WorkerConfig};
use crate::domain::{Binding, WorkerState};
use crate::error::{AppError, Result};
use crate::port::{FunctionExecutor, MessageQueue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Live worker owned by the binding table
struct BindingHandle {
    binding: Binding,
    cancel: CancellationToken,
    state: Arc<watch::Sender<WorkerState>>,
    task: JoinHandle<()>,
}

impl BindingHandle {
    /// Cancel the worker and wait for its loop to exit
    async fn stop(self) {
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Running {
                *state = WorkerState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();

        if let Err(e) = self.task.await {
            error!(
                function_blob_id = %self.binding.function_blob_id,
                "Worker task ended abnormally: {:?}", e
            );
            self.state.send_replace(WorkerState::Stopped);
        }
    }
}

/// Queue trigger dispatcher
///
/// Owns the binding table. At most one binding exists per function blob id;
/// activating an id again replaces its worker.
pub struct QueueTriggerDispatcher {
    queues: Arc<dyn MessageQueue>,
    executor: Arc<dyn FunctionExecutor>,
    shutdown: ShutdownToken,
    config: WorkerConfig,
    bindings: Mutex<HashMap<String, BindingHandle>>,
    closed: AtomicBool,
}

impl QueueTriggerDispatcher {
    pub fn new(
        queues: Arc<dyn MessageQueue>,
        executor: Arc<dyn FunctionExecutor>,
        shutdown: ShutdownToken,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queues,
            executor,
            shutdown,
            config,
            bindings: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind `function_name` of module `function_blob_id` to `queue`
    ///
    /// Creates the queue when missing. Any previous binding for the same id
    /// is stopped before the replacement starts.
    pub async fn activate(
        &self,
        function_blob_id: &str,
        function_name: &str,
        queue: &str,
    ) -> Result<()> {
        let binding = Binding::new(function_blob_id, function_name, queue)?;
        self.ensure_open()?;
        self.queues.create_queue(binding.queue.as_str()).await?;

        let mut bindings = self.bindings.lock().await;
        // Re-check under the lock: shutdown() may have drained the table meanwhile
        self.ensure_open()?;

        if let Some(previous) = bindings.remove(&binding.function_blob_id) {
            info!(
                function_blob_id = %binding.function_blob_id,
                old_queue = %previous.binding.queue,
                new_queue = %binding.queue,
                "Replacing existing binding"
            );
            previous.stop().await;
        }

        let handle = self.spawn_worker(binding.clone());
        bindings.insert(binding.function_blob_id.clone(), handle);

        info!(
            function_blob_id = %binding.function_blob_id,
            function = %binding.function_name,
            queue = %binding.queue,
            "Binding activated"
        );
        Ok(())
    }

    /// Stop the binding for `function_blob_id` (no-op when absent)
    pub async fn deactivate(&self, function_blob_id: &str) -> Result<()> {
        let removed = self.bindings.lock().await.remove(function_blob_id.trim());

        match removed {
            Some(handle) => {
                let queue = handle.binding.queue.clone();
                handle.stop().await;
                info!(function_blob_id = %function_blob_id, queue = %queue, "Binding deactivated");
            }
            None => {
                info!(function_blob_id = %function_blob_id, "No active binding to deactivate");
            }
        }
        Ok(())
    }

    /// Snapshot of active bindings, sorted by function blob id
    pub async fn bindings(&self) -> Vec<Binding> {
        let mut list: Vec<Binding> = self
            .bindings
            .lock()
            .await
            .values()
            .map(|h| h.binding.clone())
            .collect();
        list.sort_by(|a, b| a.function_blob_id.cmp(&b.function_blob_id));
        list
    }

    pub async fn worker_state(&self, function_blob_id: &str) -> Option<WorkerState> {
        self.bindings
            .lock()
            .await
            .get(function_blob_id)
            .map(|h| *h.state.borrow())
    }

    /// Stop every worker and refuse further activations
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let drained: Vec<BindingHandle> = {
            let mut bindings = self.bindings.lock().await;
            bindings.drain().map(|(_, h)| h).collect()
        };
        let count = drained.len();

        futures::future::join_all(drained.into_iter().map(BindingHandle::stop)).await;
        info!(stopped_workers = %count, "Dispatcher shut down");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.shutdown.is_shutdown() {
            return Err(AppError::InvalidState(
                "Dispatcher has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn spawn_worker(&self, binding: Binding) -> BindingHandle {
        let cancel = self.shutdown.child();
        let consumer = QueueConsumer::new(
            binding.clone(),
            Arc::clone(&self.queues),
            Arc::clone(&self.executor),
            self.config.clone(),
        );
        let state = consumer.state_handle();
        let task = tokio::spawn(consumer.run(cancel.clone(), self.shutdown.child()));

        BindingHandle {
            binding,
            cancel,
            state,
            task,
        }
    }
}
