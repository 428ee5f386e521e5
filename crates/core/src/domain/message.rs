// Message Domain Model

use serde::{Deserialize, Serialize};

/// Extension of persisted message files
pub const MESSAGE_FILE_EXTENSION: &str = "bin";

/// Reference to one persisted message, in FIFO position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub file_name: String,
    pub size: u64,
}

impl MessageRef {
    pub fn new(file_name: impl Into<String>, size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size,
        }
    }
}

/// Build a message file name: `<ts>_<id>.bin`
///
/// The timestamp is zero-padded so lexical order matches creation order.
pub fn message_file_name(created_at_ms: i64, id: &str) -> String {
    format!(
        "{:013}_{}.{}",
        created_at_ms.max(0),
        id,
        MESSAGE_FILE_EXTENSION
    )
}

/// True when `file_name` looks like a persisted message
pub fn is_message_file(file_name: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => ext == MESSAGE_FILE_EXTENSION && stem.contains('_'),
        None => false,
    }
}
