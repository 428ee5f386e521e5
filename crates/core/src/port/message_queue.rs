// Message Queue Port (Interface)

use crate::domain::{QueueName, QueueStats};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Durable FIFO queue store
///
/// Implementations must be safe for any number of concurrent callers and
/// keep strict FIFO order per queue. There is no ordering across queues.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Create the queue if it does not exist (idempotent)
    async fn create_queue(&self, name: &str) -> Result<QueueName>;

    /// Append a message
    ///
    /// # Errors
    /// - AppError::QuotaExceeded when a per-message or (under `Reject`)
    ///   queue-level quota is hit
    /// - AppError::LockTimeout when the queue mutex cannot be acquired in time
    async fn enqueue(&self, name: &str, payload: &Value) -> Result<()>;

    /// Remove and return the oldest message
    ///
    /// Waits up to `wait` for a message. Returns `Ok(None)` when the wait
    /// elapses or `cancel` fires; "no message" is never an error.
    async fn dequeue(
        &self,
        name: &str,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>>;

    /// Delete every pending message, returning how many were removed
    async fn purge(&self, name: &str) -> Result<usize>;

    /// Per-queue counters (eventually consistent with concurrent mutators)
    async fn stats(&self) -> Result<Vec<QueueStats>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// In-memory queue that records every dequeue call
    #[derive(Default)]
    pub struct RecordingQueue {
        queues: Mutex<HashMap<String, VecDeque<Value>>>,
        dequeue_calls: Mutex<HashMap<String, usize>>,
        failing_dequeues: AtomicUsize,
        notify: Notify,
    }

    impl RecordingQueue {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of dequeue calls observed against `queue`
        pub fn dequeue_calls(&self, queue: &str) -> usize {
            self.dequeue_calls
                .lock()
                .unwrap()
                .get(queue)
                .copied()
                .unwrap_or(0)
        }

        /// Make the next `count` dequeue calls fail
        pub fn fail_next_dequeues(&self, count: usize) {
            self.failing_dequeues.store(count, Ordering::SeqCst);
        }

        pub fn len(&self, queue: &str) -> usize {
            self.queues
                .lock()
                .unwrap()
                .get(queue)
                .map(|q| q.len())
                .unwrap_or(0)
        }

        fn pop(&self, queue: &str) -> Option<Value> {
            self.queues
                .lock()
                .unwrap()
                .get_mut(queue)
                .and_then(|q| q.pop_front())
        }
    }

    #[async_trait]
    impl MessageQueue for RecordingQueue {
        async fn create_queue(&self, name: &str) -> Result<QueueName> {
            let queue = QueueName::parse(name)?;
            self.queues
                .lock()
                .unwrap()
                .entry(queue.to_string())
                .or_default();
            Ok(queue)
        }

        async fn enqueue(&self, name: &str, payload: &Value) -> Result<()> {
            let queue = QueueName::parse(name)?;
            self.queues
                .lock()
                .unwrap()
                .entry(queue.to_string())
                .or_default()
                .push_back(payload.clone());
            self.notify.notify_waiters();
            Ok(())
        }

        async fn dequeue(
            &self,
            name: &str,
            wait: Duration,
            cancel: &CancellationToken,
        ) -> Result<Option<Value>> {
            let queue = QueueName::parse(name)?.to_string();
            *self
                .dequeue_calls
                .lock()
                .unwrap()
                .entry(queue.clone())
                .or_default() += 1;

            let injected = self
                .failing_dequeues
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if injected.is_ok() {
                return Err(AppError::Internal("injected dequeue failure".to_string()));
            }

            let deadline = tokio::time::Instant::now() + wait;
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(value) = self.pop(&queue) {
                    return Ok(Some(value));
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(deadline) => return Ok(None),
                    _ = cancel.cancelled() => return Ok(None),
                }
            }
        }

        async fn purge(&self, name: &str) -> Result<usize> {
            let queue = QueueName::parse(name)?;
            let removed = self
                .queues
                .lock()
                .unwrap()
                .get_mut(queue.as_str())
                .map(|q| q.drain(..).count())
                .unwrap_or(0);
            Ok(removed)
        }

        async fn stats(&self) -> Result<Vec<QueueStats>> {
            let queues = self.queues.lock().unwrap();
            let mut stats: Vec<QueueStats> = queues
                .iter()
                .map(|(name, q)| QueueStats {
                    name: name.clone(),
                    message_count: q.len(),
                    total_bytes: q.iter().map(|v| v.to_string().len() as u64).sum(),
                })
                .collect();
            stats.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(stats)
        }
    }
}
