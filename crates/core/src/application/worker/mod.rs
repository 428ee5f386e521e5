// Worker - Queue consumer loop for one binding

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::domain::{Binding, WorkerState};
use crate::port::{ExecutionRequest, FunctionExecutor, MessageQueue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Consumer loop tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bound on a single dequeue call
    pub dequeue_wait: Duration,
    /// Pause after a dequeue-layer error
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_wait: DEQUEUE_WAIT_DURATION,
            error_backoff: ERROR_RECOVERY_SLEEP_DURATION,
        }
    }
}

/// Consumer for one queue→function binding
///
/// Blocks on the queue and runs the bound function for every message. An
/// execution failure is logged and the loop moves on to the next message.
pub struct QueueConsumer {
    binding: Binding,
    queues: Arc<dyn MessageQueue>,
    executor: Arc<dyn FunctionExecutor>,
    config: WorkerConfig,
    state: Arc<watch::Sender<WorkerState>>,
}

impl QueueConsumer {
    pub fn new(
        binding: Binding,
        queues: Arc<dyn MessageQueue>,
        executor: Arc<dyn FunctionExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Created);
        Self {
            binding,
            queues,
            executor,
            config,
            state: Arc::new(state),
        }
    }

    /// Shared handle on this worker's lifecycle state
    pub fn state_handle(&self) -> Arc<watch::Sender<WorkerState>> {
        Arc::clone(&self.state)
    }

    /// Run the consumer loop until `cancel` fires
    ///
    /// `invocation_cancel` is handed to each function run; it is separate from
    /// `cancel` so stopping the loop does not abort an in-flight invocation.
    pub async fn run(self, cancel: CancellationToken, invocation_cancel: CancellationToken) {
        let queue = self.binding.queue.to_string();
        self.state.send_replace(WorkerState::Running);
        info!(
            function_blob_id = %self.binding.function_blob_id,
            function = %self.binding.function_name,
            queue = %queue,
            "Queue consumer started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self
                .queues
                .dequeue(&queue, self.config.dequeue_wait, &cancel)
                .await
            {
                Ok(Some(payload)) => self.dispatch(payload, &invocation_cancel).await,
                Ok(None) => {
                    debug!(queue = %queue, "No message before wait elapsed");
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Dequeue failed, backing off");
                    tokio::select! {
                        _ = sleep(self.config.error_backoff) => {},
                        _ = cancel.cancelled() => {
                            info!(queue = %queue, "Consumer interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }

        self.state.send_replace(WorkerState::Stopping);
        info!(
            function_blob_id = %self.binding.function_blob_id,
            queue = %queue,
            "Queue consumer stopped"
        );
        self.state.send_replace(WorkerState::Stopped);
    }

    /// Run the bound function for one message
    ///
    /// The run is spawned so a panicking executor cannot take the loop down.
    async fn dispatch(&self, payload: Value, invocation_cancel: &CancellationToken) {
        let request = ExecutionRequest::new(
            self.binding.function_blob_id.clone(),
            self.binding.function_name.clone(),
        )
        .with_payload(payload)
        .with_cancel(invocation_cancel.clone());

        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move { executor.run(request).await });

        match handle.await {
            Ok(Ok(outcome)) => {
                info!(
                    function_blob_id = %self.binding.function_blob_id,
                    entry_point = %outcome.entry_point,
                    shape = %outcome.shape,
                    duration_ms = %outcome.duration_ms,
                    "Function executed"
                );
            }
            Ok(Err(e)) => {
                error!(
                    function_blob_id = %self.binding.function_blob_id,
                    function = %self.binding.function_name,
                    error = %e,
                    "Function execution failed"
                );
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(
                        function_blob_id = %self.binding.function_blob_id,
                        "Function execution panicked: {:?}", join_err
                    );
                } else {
                    error!(
                        function_blob_id = %self.binding.function_blob_id,
                        "Function execution cancelled: {:?}", join_err
                    );
                }
            }
        }
    }
}
