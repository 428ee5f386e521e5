// File-backed MessageQueue Implementation

use crate::index::{load_queue, persist_index};
use async_trait::async_trait;
use conveyor_core::application::RetryPolicy;
use conveyor_core::domain::message::message_file_name;
use conveyor_core::domain::{
    MessageRef, OverflowPolicy, QueueName, QueueStats, QueueStorageOptions,
};
use conveyor_core::error::{AppError, Result};
use conveyor_core::port::{IdProvider, MessageQueue, TimeProvider};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Mutable part of a queue, guarded by the queue mutex
struct QueueState {
    refs: VecDeque<MessageRef>,
    total_bytes: u64,
}

/// One loaded queue
struct QueueHandle {
    name: QueueName,
    dir: PathBuf,
    state: Mutex<QueueState>,
    /// One permit per message a consumer may take
    available: Semaphore,
    message_count: AtomicUsize,
    total_bytes: AtomicU64,
}

impl QueueHandle {
    fn publish_stats(&self, state: &QueueState) {
        self.message_count.store(state.refs.len(), Ordering::Release);
        self.total_bytes.store(state.total_bytes, Ordering::Release);
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            name: self.name.to_string(),
            message_count: self.message_count.load(Ordering::Acquire),
            total_bytes: self.total_bytes.load(Ordering::Acquire),
        }
    }
}

/// Registry entry, filled once the queue has been loaded
type QueueSlot = Arc<OnceCell<Arc<QueueHandle>>>;

/// Durable queue store: one directory per queue, one file per message
pub struct FileQueueStore {
    options: QueueStorageOptions,
    retry: RetryPolicy,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    queues: Mutex<HashMap<String, QueueSlot>>,
}

impl FileQueueStore {
    pub fn new(
        options: QueueStorageOptions,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            options,
            retry: RetryPolicy::default(),
            id_provider,
            time_provider,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Loaded handle for `name`, running recovery on first touch
    async fn queue(&self, name: &QueueName) -> Result<Arc<QueueHandle>> {
        let slot = {
            let mut queues = self.queues.lock().await;
            Arc::clone(queues.entry(name.to_string()).or_default())
        };
        // Loads of one queue are serialized; the registry is not held meanwhile
        let handle = slot.get_or_try_init(|| self.load_handle(name)).await?;
        Ok(Arc::clone(handle))
    }

    async fn load_handle(&self, name: &QueueName) -> Result<Arc<QueueHandle>> {
        let dir = self.options.base_dir.join(name.as_str());
        let loaded = load_queue(&dir, self.options.cleanup_orphans).await?;
        info!(
            queue = %name,
            message_count = %loaded.refs.len(),
            total_bytes = %loaded.total_bytes,
            "Queue loaded"
        );

        Ok(Arc::new(QueueHandle {
            name: name.clone(),
            dir,
            available: Semaphore::new(loaded.refs.len()),
            message_count: AtomicUsize::new(loaded.refs.len()),
            total_bytes: AtomicU64::new(loaded.total_bytes),
            state: Mutex::new(QueueState {
                refs: loaded.refs,
                total_bytes: loaded.total_bytes,
            }),
        }))
    }

    async fn lock_state<'a>(&self, handle: &'a QueueHandle) -> Result<MutexGuard<'a, QueueState>> {
        let timeout = self.options.lock_timeout;
        tokio::time::timeout(timeout, handle.state.lock())
            .await
            .map_err(|_| {
                warn!(queue = %handle.name, timeout_ms = %timeout.as_millis(), "Queue lock timed out");
                AppError::LockTimeout {
                    queue: handle.name.to_string(),
                    timeout,
                }
            })
    }

    fn exceeds_quota(&self, state: &QueueState, incoming: u64) -> bool {
        let over_count = state.refs.len() + 1 > self.options.max_queue_messages;
        let over_bytes = self
            .options
            .max_queue_bytes
            .map_or(false, |max| state.total_bytes + incoming > max);
        over_count || over_bytes
    }

    /// Evict from the head until `incoming` bytes fit; returns evicted count
    async fn evict_oldest(&self, handle: &QueueHandle, state: &mut QueueState, incoming: u64) -> usize {
        let mut evicted = 0;
        while self.exceeds_quota(state, incoming) {
            let Some(oldest) = state.refs.pop_front() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(oldest.size);
            remove_message_file(&handle.dir, &oldest.file_name).await;
            evicted += 1;
        }

        // Permits held by waiting consumers are reconciled when they find the queue empty
        for _ in 0..evicted {
            match handle.available.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }
        evicted
    }

    async fn write_message(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.retry
            .run("write_message", move || async move {
                tokio::fs::write(path, bytes).await.map_err(AppError::from)
            })
            .await
    }

    async fn persist(&self, handle: &QueueHandle, state: &QueueState) -> Result<()> {
        let dir = handle.dir.as_path();
        let refs = &state.refs;
        self.retry
            .run("persist_index", move || persist_index(dir, refs))
            .await
    }

    /// Read and parse one message, retrying transient faults
    async fn read_message(&self, path: &Path) -> Result<Value> {
        self.retry
            .run("read_message", move || async move {
                let bytes = tokio::fs::read(path).await?;
                Ok::<Value, AppError>(serde_json::from_slice(&bytes)?)
            })
            .await
    }

    async fn known_queue_names(&self) -> Result<Vec<QueueName>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.options.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(raw) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Only directories this store could have created
            match QueueName::parse(&raw) {
                Ok(name) if name.as_str() == raw => names.push(name),
                _ => debug!(dir = %raw, "Skipping non-queue directory"),
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl MessageQueue for FileQueueStore {
    async fn create_queue(&self, name: &str) -> Result<QueueName> {
        let queue = QueueName::parse(name)?;
        self.queue(&queue).await?;
        Ok(queue)
    }

    async fn enqueue(&self, name: &str, payload: &Value) -> Result<()> {
        let queue = QueueName::parse(name)?;
        let bytes = serde_json::to_vec(payload)?;
        let size = bytes.len() as u64;

        if bytes.len() > self.options.max_message_bytes {
            return Err(AppError::QuotaExceeded(format!(
                "Message of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.options.max_message_bytes
            )));
        }
        if let Some(max) = self.options.max_queue_bytes {
            if size > max {
                return Err(AppError::QuotaExceeded(format!(
                    "Message of {} bytes exceeds the queue capacity of {} bytes",
                    size, max
                )));
            }
        }

        let handle = self.queue(&queue).await?;
        let mut state = self.lock_state(&handle).await?;

        if self.exceeds_quota(&state, size) && self.options.overflow_policy == OverflowPolicy::Reject {
            return Err(AppError::QuotaExceeded(format!(
                "Queue '{}' is full ({} messages, {} bytes)",
                queue,
                state.refs.len(),
                state.total_bytes
            )));
        }

        let file_name = message_file_name(
            self.time_provider.now_millis(),
            &self.id_provider.generate_id(),
        );
        let path = handle.dir.join(&file_name);
        self.write_message(&path, &bytes).await?;

        if self.exceeds_quota(&state, size) {
            let evicted = self.evict_oldest(&handle, &mut state, size).await;
            if self.exceeds_quota(&state, size) {
                remove_message_file(&handle.dir, &file_name).await;
                self.persist(&handle, &state).await?;
                handle.publish_stats(&state);
                return Err(AppError::QuotaExceeded(format!(
                    "Queue '{}' cannot hold any message",
                    queue
                )));
            }
            info!(queue = %queue, evicted = %evicted, "Evicted oldest messages to make room");
        }

        state.refs.push_back(MessageRef::new(file_name.clone(), size));
        state.total_bytes += size;

        if let Err(e) = self.persist(&handle, &state).await {
            state.refs.pop_back();
            state.total_bytes -= size;
            handle.publish_stats(&state);
            remove_message_file(&handle.dir, &file_name).await;
            error!(queue = %queue, error = %e, "Failed to persist queue index, enqueue rolled back");
            return Err(e);
        }

        handle.publish_stats(&state);
        handle.available.add_permits(1);
        debug!(queue = %queue, file = %file_name, size = %size, "Message enqueued");
        Ok(())
    }

    async fn dequeue(
        &self,
        name: &str,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let queue = QueueName::parse(name)?;
        let handle = self.queue(&queue).await?;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                permit = handle.available.acquire() => permit,
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            };
            let permit = permit
                .map_err(|_| AppError::InvalidState(format!("Queue '{}' is closed", queue)))?;

            // The permit goes back to the semaphore if this future is dropped
            // or the lock times out before a ref is popped
            let mut state = self.lock_state(&handle).await?;
            let head = state.refs.pop_front();
            permit.forget();

            // Evicted or purged while we waited for the lock
            let Some(head) = head else {
                continue;
            };

            let path = handle.dir.join(&head.file_name);
            let value = match self.read_message(&path).await {
                Ok(value) => Some(value),
                Err(AppError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    warn!(queue = %queue, file = %head.file_name, "Message file vanished, skipping");
                    None
                }
                Err(AppError::Serialization(e)) => {
                    error!(queue = %queue, file = %head.file_name, error = %e, "Discarding unreadable message");
                    state.total_bytes = state.total_bytes.saturating_sub(head.size);
                    remove_message_file(&handle.dir, &head.file_name).await;
                    if let Err(persist_err) = self.persist(&handle, &state).await {
                        error!(queue = %queue, error = %persist_err, "Failed to persist queue index");
                    }
                    handle.publish_stats(&state);
                    return Err(AppError::Serialization(e));
                }
                Err(e) => {
                    state.refs.push_front(head);
                    handle.available.add_permits(1);
                    return Err(e);
                }
            };

            state.total_bytes = state.total_bytes.saturating_sub(head.size);
            if value.is_some() {
                remove_message_file(&handle.dir, &head.file_name).await;
            }
            // The file is gone already; a stale index entry is dropped on next load
            if let Err(e) = self.persist(&handle, &state).await {
                error!(queue = %queue, error = %e, "Failed to persist queue index after dequeue");
            }
            handle.publish_stats(&state);

            if let Some(value) = value {
                debug!(queue = %queue, file = %head.file_name, "Message dequeued");
                return Ok(Some(value));
            }
        }
    }

    async fn purge(&self, name: &str) -> Result<usize> {
        let queue = QueueName::parse(name)?;
        let handle = self.queue(&queue).await?;
        let mut state = self.lock_state(&handle).await?;

        let drained: Vec<MessageRef> = state.refs.drain(..).collect();
        state.total_bytes = 0;
        for message in &drained {
            remove_message_file(&handle.dir, &message.file_name).await;
        }

        let permits = handle.available.available_permits();
        if let Ok(permit) = handle.available.try_acquire_many(permits as u32) {
            permit.forget();
        }

        self.persist(&handle, &state).await?;
        handle.publish_stats(&state);

        info!(queue = %queue, removed = %drained.len(), "Queue purged");
        Ok(drained.len())
    }

    async fn stats(&self) -> Result<Vec<QueueStats>> {
        for name in self.known_queue_names().await? {
            self.queue(&name).await?;
        }

        let queues = self.queues.lock().await;
        let mut stats: Vec<QueueStats> = queues
            .values()
            .filter_map(|slot| slot.get())
            .map(|h| h.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }
}

/// Delete a message file; failures are logged only
async fn remove_message_file(dir: &Path, file_name: &str) {
    match tokio::fs::remove_file(dir.join(file_name)).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), file = %file_name, error = %e, "Failed to delete message file"),
    }
}
