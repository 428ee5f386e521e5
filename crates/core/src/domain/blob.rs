// Blob Domain Model (code module descriptors)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key naming the queue a module is bound to
pub const TRIGGER_QUEUE_KEY: &str = "trigger-queue";

/// Metadata key naming the function invoked by the queue trigger
pub const FUNCTION_NAME_KEY: &str = "function-name";

/// Function name used when a bound module does not name one
pub const DEFAULT_FUNCTION_NAME: &str = "run";

/// Stored blob information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BlobInfo {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Queue this module is bound to, if any
    pub fn trigger_queue(&self) -> Option<&str> {
        self.metadata
            .get(TRIGGER_QUEUE_KEY)
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
    }

    pub fn trigger_function(&self) -> &str {
        self.metadata
            .get(FUNCTION_NAME_KEY)
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_FUNCTION_NAME)
    }
}

/// Blob id plus its information, as listed by the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub id: String,
    pub info: BlobInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_metadata() {
        let info = BlobInfo::new("echo.wasm", "application/wasm")
            .with_metadata(TRIGGER_QUEUE_KEY, "orders");
        assert_eq!(info.trigger_queue(), Some("orders"));
        assert_eq!(info.trigger_function(), DEFAULT_FUNCTION_NAME);

        let info = info.with_metadata(FUNCTION_NAME_KEY, "handle");
        assert_eq!(info.trigger_function(), "handle");
    }

    #[test]
    fn test_blank_trigger_queue_is_unbound() {
        let info = BlobInfo::new("x.wasm", "application/wasm").with_metadata(TRIGGER_QUEUE_KEY, " ");
        assert_eq!(info.trigger_queue(), None);
    }
}
