// Queue Service - facade consumed by the HTTP/CLI surface

use crate::application::dispatcher::QueueTriggerDispatcher;
use crate::application::worker::ShutdownToken;
use crate::domain::{QueueName, QueueStats};
use crate::error::Result;
use crate::port::MessageQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Trigger activation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub function_blob_id: String,
    #[serde(default = "default_function_name")]
    pub function_name: String,
    pub queue: String,
}

fn default_function_name() -> String {
    crate::domain::DEFAULT_FUNCTION_NAME.to_string()
}

/// Queue and trigger operations behind one handle
#[derive(Clone)]
pub struct QueueService {
    queues: Arc<dyn MessageQueue>,
    dispatcher: Arc<QueueTriggerDispatcher>,
    shutdown: ShutdownToken,
}

impl QueueService {
    pub fn new(
        queues: Arc<dyn MessageQueue>,
        dispatcher: Arc<QueueTriggerDispatcher>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            queues,
            dispatcher,
            shutdown,
        }
    }

    pub async fn create_queue(&self, name: &str) -> Result<QueueName> {
        self.queues.create_queue(name).await
    }

    pub async fn purge_queue(&self, name: &str) -> Result<usize> {
        self.queues.purge(name).await
    }

    pub async fn enqueue(&self, name: &str, payload: &Value) -> Result<()> {
        self.queues.enqueue(name, payload).await
    }

    /// Take one message, waiting at most `timeout`
    ///
    /// Host shutdown ends the wait early with `Ok(None)`.
    pub async fn dequeue(&self, name: &str, timeout: Duration) -> Result<Option<Value>> {
        let cancel = self.shutdown.child();
        self.queues.dequeue(name, timeout, &cancel).await
    }

    pub async fn stats(&self) -> Result<Vec<QueueStats>> {
        self.queues.stats().await
    }

    pub async fn activate_trigger(&self, req: TriggerRequest) -> Result<()> {
        self.dispatcher
            .activate(&req.function_blob_id, &req.function_name, &req.queue)
            .await
    }

    pub async fn deactivate_trigger(&self, function_blob_id: &str) -> Result<()> {
        self.dispatcher.deactivate(function_blob_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::{shutdown_channel, WorkerConfig};
    use crate::port::function_executor::mocks::RecordingExecutor;
    use crate::port::message_queue::mocks::RecordingQueue;
    use serde_json::json;
    use std::time::Instant;

    fn service(queue: Arc<RecordingQueue>) -> (crate::application::worker::ShutdownSender, QueueService) {
        let (tx, token) = shutdown_channel();
        let dispatcher = Arc::new(QueueTriggerDispatcher::new(
            queue.clone(),
            Arc::new(RecordingExecutor::new_success()),
            token.clone(),
            WorkerConfig::default(),
        ));
        (tx, QueueService::new(queue, dispatcher, token))
    }

    #[tokio::test]
    async fn test_queue_round_trip_through_facade() {
        let queue = Arc::new(RecordingQueue::new());
        let (_tx, service) = service(queue);

        let name = service.create_queue("my queue").await.unwrap();
        assert_eq!(name.as_str(), "my_queue");

        service.enqueue("my queue", &json!({"n": 1})).await.unwrap();
        service.enqueue("my queue", &json!({"n": 2})).await.unwrap();
        assert_eq!(service.stats().await.unwrap()[0].message_count, 2);

        let first = service
            .dequeue("my queue", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first, Some(json!({"n": 1})));
        assert_eq!(service.purge_queue("my queue").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_returns_on_host_shutdown() {
        let queue = Arc::new(RecordingQueue::new());
        let (tx, service) = service(queue);

        let started = Instant::now();
        let waiter = tokio::spawn(async move {
            service.dequeue("idle", Duration::from_secs(30)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.shutdown();

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_trigger_request_defaults_function_name() {
        let req: TriggerRequest =
            serde_json::from_value(json!({"function_blob_id": "b", "queue": "q"})).unwrap();
        assert_eq!(req.function_name, "run");

        let queue = Arc::new(RecordingQueue::new());
        let (_tx, service) = service(queue);
        service.activate_trigger(req).await.unwrap();
        service.deactivate_trigger("b").await.unwrap();
    }
}
