// Binding Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::queue::QueueName;
use crate::error::{AppError, Result};

/// Association of a function (by code-module id) to a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub function_blob_id: String,
    pub function_name: String,
    pub queue: QueueName,
}

impl Binding {
    /// Validate inputs and build a binding
    pub fn new(function_blob_id: &str, function_name: &str, queue: &str) -> Result<Self> {
        if function_blob_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Function blob id cannot be empty".to_string(),
            ));
        }
        if function_name.trim().is_empty() {
            return Err(AppError::Validation(
                "Function name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            function_blob_id: function_blob_id.trim().to_string(),
            function_name: function_name.trim().to_string(),
            queue: QueueName::parse(queue)?,
        })
    }
}

/// Lifecycle of a binding's consumer worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Created => write!(f, "CREATED"),
            WorkerState::Running => write!(f, "RUNNING"),
            WorkerState::Stopping => write!(f, "STOPPING"),
            WorkerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_requires_all_fields() {
        assert!(Binding::new("", "run", "q").is_err());
        assert!(Binding::new("blob", " ", "q").is_err());
        assert!(Binding::new("blob", "run", "").is_err());
    }

    #[test]
    fn test_binding_sanitizes_queue() {
        let binding = Binding::new(" blob-1 ", "run", "in box").unwrap();
        assert_eq!(binding.function_blob_id, "blob-1");
        assert_eq!(binding.queue.as_str(), "in_box");
    }
}
