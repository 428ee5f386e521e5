// Queue Domain Model

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum accepted queue name length (after sanitizing)
pub const MAX_QUEUE_NAME_LEN: usize = 128;

/// Default bound on waiting for a queue's mutex
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Filesystem-safe queue identifier
///
/// Characters outside `[A-Za-z0-9_.-]` are replaced with `_`, so two raw
/// names that sanitize to the same value address the same queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "Queue name cannot be empty".to_string(),
            ));
        }

        let sanitized: String = trimmed
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.len() > MAX_QUEUE_NAME_LEN {
            return Err(AppError::Validation(format!(
                "Queue name too long: {} chars (max: {})",
                sanitized.len(),
                MAX_QUEUE_NAME_LEN
            )));
        }

        // "." and ".." would escape the queue directory
        if sanitized.chars().all(|c| c == '.') {
            return Err(AppError::Validation(format!(
                "Invalid queue name: '{}'",
                raw
            )));
        }

        Ok(Self(sanitized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Behavior when an enqueue would exceed a queue-level quota
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new message with `QuotaExceeded`
    #[default]
    Reject,
    /// Evict the oldest messages until the new one fits
    DropOldest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Reject => write!(f, "REJECT"),
            OverflowPolicy::DropOldest => write!(f, "DROP_OLDEST"),
        }
    }
}

/// Per-store configuration
#[derive(Debug, Clone)]
pub struct QueueStorageOptions {
    pub base_dir: PathBuf,
    pub max_queue_bytes: Option<u64>,
    pub max_queue_messages: usize,
    pub max_message_bytes: usize,
    pub overflow_policy: OverflowPolicy,
    /// Delete message files that the index does not reference on load
    pub cleanup_orphans: bool,
    pub lock_timeout: Duration,
}

impl QueueStorageOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_max_queue_messages(mut self, max: usize) -> Self {
        self.max_queue_messages = max;
        self
    }

    pub fn with_max_queue_bytes(mut self, max: u64) -> Self {
        self.max_queue_bytes = Some(max);
        self
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_cleanup_orphans(mut self, enabled: bool) -> Self {
        self.cleanup_orphans = enabled;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl Default for QueueStorageOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("queues"),
            max_queue_bytes: None,
            max_queue_messages: 10_000,
            max_message_bytes: 256 * 1024,
            overflow_policy: OverflowPolicy::Reject,
            cleanup_orphans: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Point-in-time view of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub message_count: usize,
    pub total_bytes: u64,
}
