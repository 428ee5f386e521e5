// Function Executor Port
// Abstraction for running a named function from a code module in a sandbox

use crate::domain::ParamShape;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Execution request (transient, never persisted)
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub module_id: String,
    pub function_name: String,
    pub payload: Option<Value>,
    pub cancel: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(module_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            function_name: function_name.into(),
            payload: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a completed invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Export that was invoked
    pub entry_point: String,
    pub shape: ParamShape,
    pub duration_ms: u64,
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Code module not found: {0}")]
    BlobNotFound(String),

    #[error("No compatible entry point '{function}' in module {module_id}")]
    MissingCallable { module_id: String, function: String },

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution failed: {0}")]
    Failed(String),

    #[error("Execution cancelled")]
    Cancelled,
}

/// Function Executor trait
///
/// Implementations:
/// - SandboxExecutor: loads a wasm module into a private engine per call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionExecutor: Send + Sync {
    /// Run `request.function_name` from module `request.module_id`
    ///
    /// # Errors
    /// - ExecutionError::BlobNotFound if the module cannot be fetched
    /// - ExecutionError::MissingCallable if no compatible entry point exists
    /// - ExecutionError::Timeout if the execution timeout elapses
    /// - ExecutionError::Failed for any other invocation fault
    /// - ExecutionError::Cancelled if `request.cancel` fires first
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Fail when the payload equals the given value
        FailOn(Value),
        /// Panic when the payload equals the given value
        PanicOn(Value),
        /// Sleep before succeeding
        Delay(Duration),
    }

    /// Executor that records every payload it was asked to run
    pub struct RecordingExecutor {
        behavior: MockBehavior,
        calls: Mutex<Vec<ExecutionRequest>>,
    }

    impl RecordingExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Payloads of attempted runs, in call order
        pub fn payloads(&self) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl FunctionExecutor for RecordingExecutor {
        async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.lock().unwrap().push(request.clone());

            let outcome = ExecutionOutcome {
                entry_point: request.function_name.clone(),
                shape: ParamShape::Element,
                duration_ms: 0,
            };

            match &self.behavior {
                MockBehavior::Success => Ok(outcome),
                MockBehavior::FailOn(bad) if request.payload.as_ref() == Some(bad) => {
                    Err(ExecutionError::Failed(format!("mock failure for {}", bad)))
                }
                MockBehavior::PanicOn(bad) if request.payload.as_ref() == Some(bad) => {
                    panic!("mock panic for {}", bad);
                }
                MockBehavior::FailOn(_) | MockBehavior::PanicOn(_) => Ok(outcome),
                MockBehavior::Delay(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(outcome)
                }
            }
        }
    }
}
