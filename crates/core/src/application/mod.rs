// Application Layer - Use Cases and Business Logic

pub mod dispatcher;
pub mod queue_service;
pub mod recovery;
pub mod retry;
pub mod worker;

// Re-exports
pub use dispatcher::QueueTriggerDispatcher;
pub use queue_service::{QueueService, TriggerRequest};
pub use recovery::{BindingRecovery, RecoveryReport};
pub use retry::RetryPolicy;
pub use worker::{shutdown_channel, QueueConsumer, ShutdownSender, ShutdownToken, WorkerConfig};
