// Port Layer - Interfaces for external dependencies

pub mod blob_store;
pub mod function_executor;
pub mod id_provider; // For deterministic testing
pub mod message_queue;
pub mod time_provider;

// Re-exports
pub use blob_store::{BlobStore, BlobStream};
pub use function_executor::{ExecutionError, ExecutionOutcome, ExecutionRequest, FunctionExecutor};
pub use id_provider::IdProvider;
pub use message_queue::MessageQueue;
pub use time_provider::TimeProvider;
