// Sandbox FunctionExecutor Implementation

use crate::runtime::WasmModuleRuntime;
use async_trait::async_trait;
use conveyor_core::application::worker::constants::DEFAULT_EXECUTION_TIMEOUT;
use conveyor_core::domain::select_entry_point;
use conveyor_core::port::{
    BlobStore, ExecutionError, ExecutionOutcome, ExecutionRequest, FunctionExecutor,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wasmtime::Engine;

/// Epoch bump interval while waiting for an interrupted guest to trap
const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Sandbox settings
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory for per-invocation module copies
    pub scratch_dir: PathBuf,
    pub execution_timeout: Duration,
}

impl SandboxConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// Runs functions from wasm code modules held in a blob store
///
/// Every invocation gets its own scratch copy of the module, its own engine
/// and its own store; nothing is shared between invocations.
pub struct SandboxExecutor {
    blob_store: Arc<dyn BlobStore>,
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(blob_store: Arc<dyn BlobStore>, config: SandboxConfig) -> Self {
        Self { blob_store, config }
    }

    /// Copy the module bytes into a private scratch file
    async fn stage_module(&self, module_id: &str) -> Result<NamedTempFile, ExecutionError> {
        let mut stream = self
            .blob_store
            .open(module_id)
            .await
            .map_err(|e| ExecutionError::Failed(format!("blob store: {}", e)))?
            .ok_or_else(|| ExecutionError::BlobNotFound(module_id.to_string()))?;

        tokio::fs::create_dir_all(&self.config.scratch_dir)
            .await
            .map_err(|e| scratch_error(&self.config.scratch_dir, e))?;
        let scratch = tempfile::Builder::new()
            .prefix("module-")
            .suffix(".wasm")
            .tempfile_in(&self.config.scratch_dir)
            .map_err(|e| scratch_error(&self.config.scratch_dir, e))?;

        let copy = async {
            let mut file = tokio::fs::File::from_std(scratch.reopen()?);
            let bytes = tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(bytes)
        };
        match copy.await {
            Ok(bytes) => {
                debug!(module_id = %module_id, bytes = %bytes, path = %scratch.path().display(), "Module staged");
                Ok(scratch)
            }
            Err(e) => {
                discard_scratch(scratch);
                Err(scratch_error(&self.config.scratch_dir, e))
            }
        }
    }

    /// Wait for the guest, interrupting it on timeout or cancellation
    async fn supervise(
        &self,
        request: &ExecutionRequest,
        engine: Engine,
        mut task: JoinHandle<Result<ExecutionOutcome, ExecutionError>>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let timeout = self.config.execution_timeout;

        let interrupted = tokio::select! {
            joined = &mut task => return flatten(joined),
            _ = tokio::time::sleep(timeout) => ExecutionError::Timeout(timeout),
            _ = request.cancel.cancelled() => ExecutionError::Cancelled,
        };

        warn!(
            module_id = %request.module_id,
            function = %request.function_name,
            reason = %interrupted,
            "Interrupting guest"
        );
        // A guest whose deadline was set after a bump needs another one
        let mut ticker = tokio::time::interval(EPOCH_TICK);
        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = ticker.tick() => engine.increment_epoch(),
            }
        };

        // The scratch file stays until the guest has trapped
        match flatten(joined) {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(interrupted),
        }
    }
}

#[async_trait]
impl FunctionExecutor for SandboxExecutor {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        if request.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let scratch = self.stage_module(&request.module_id).await?;
        if request.cancel.is_cancelled() {
            discard_scratch(scratch);
            return Err(ExecutionError::Cancelled);
        }
        let engine = match WasmModuleRuntime::create_engine() {
            Ok(engine) => engine,
            Err(e) => {
                discard_scratch(scratch);
                return Err(e);
            }
        };

        let task = {
            let engine = engine.clone();
            let path = scratch.path().to_path_buf();
            let module_id = request.module_id.clone();
            let function_name = request.function_name.clone();
            let payload = request.payload.clone();
            tokio::task::spawn_blocking(move || {
                invoke_blocking(&engine, &path, &module_id, &function_name, payload.as_ref())
            })
        };

        let result = self.supervise(&request, engine, task).await;
        discard_scratch(scratch);

        match &result {
            Ok(outcome) => info!(
                module_id = %request.module_id,
                entry_point = %outcome.entry_point,
                duration_ms = %outcome.duration_ms,
                "Invocation succeeded"
            ),
            Err(e) => warn!(
                module_id = %request.module_id,
                function = %request.function_name,
                error = %e,
                "Invocation failed"
            ),
        }
        result
    }
}

/// Compile, resolve and invoke on the current (blocking) thread
fn invoke_blocking(
    engine: &Engine,
    path: &Path,
    module_id: &str,
    function_name: &str,
    payload: Option<&Value>,
) -> Result<ExecutionOutcome, ExecutionError> {
    let runtime = WasmModuleRuntime::load(engine, path)?;
    let candidates = runtime.entry_points();

    let entry = select_entry_point(&candidates, function_name, payload.is_some()).ok_or_else(|| {
        ExecutionError::MissingCallable {
            module_id: module_id.to_string(),
            function: function_name.to_string(),
        }
    })?;

    let input = entry
        .shape
        .encode(payload)
        .map_err(|e| ExecutionError::Failed(format!("payload encoding: {}", e)))?;

    let started = Instant::now();
    runtime.invoke(entry, input.as_deref())?;

    Ok(ExecutionOutcome {
        entry_point: entry.export.clone(),
        shape: entry.shape,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn flatten(
    joined: Result<Result<ExecutionOutcome, ExecutionError>, tokio::task::JoinError>,
) -> Result<ExecutionOutcome, ExecutionError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ExecutionError::Failed(format!("guest host panicked: {}", e))),
        Err(e) => Err(ExecutionError::Failed(format!("invocation aborted: {}", e))),
    }
}

/// Delete a scratch file, logging rather than failing
fn discard_scratch(scratch: NamedTempFile) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(path = %path.display(), error = %e, "Failed to delete scratch module");
    }
}

fn scratch_error(dir: &Path, error: std::io::Error) -> ExecutionError {
    ExecutionError::Failed(format!("scratch dir {}: {}", dir.display(), error))
}
