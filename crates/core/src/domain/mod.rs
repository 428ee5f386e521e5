// Domain Layer - Pure business logic and entities

pub mod binding;
pub mod blob;
pub mod entry_point;
pub mod message;
pub mod queue;

// Re-exports
pub use binding::{Binding, WorkerState};
pub use blob::{BlobDescriptor, BlobInfo, DEFAULT_FUNCTION_NAME, FUNCTION_NAME_KEY, TRIGGER_QUEUE_KEY};
pub use entry_point::{select_entry_point, EntryPoint, ParamShape, Receiver};
pub use message::MessageRef;
pub use queue::{OverflowPolicy, QueueName, QueueStats, QueueStorageOptions};
