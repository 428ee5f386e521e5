//! Queue-triggered execution end to end
//!
//! Real queue store + real wasm sandbox + dispatcher, plus binding recovery
//! from blob metadata.

use async_trait::async_trait;
use conveyor_core::application::{
    shutdown_channel, BindingRecovery, QueueService, QueueTriggerDispatcher, ShutdownSender,
    TriggerRequest, WorkerConfig,
};
use conveyor_core::domain::{BlobInfo, QueueStorageOptions, WorkerState, TRIGGER_QUEUE_KEY};
use conveyor_core::port::function_executor::mocks::RecordingExecutor;
use conveyor_core::port::id_provider::UuidProvider;
use conveyor_core::port::time_provider::SystemTimeProvider;
use conveyor_core::port::{
    ExecutionError, ExecutionOutcome, ExecutionRequest, FunctionExecutor, MessageQueue,
};
use conveyor_infra_fs::{FileBlobStore, FileQueueStore};
use conveyor_infra_sandbox::{SandboxConfig, SandboxExecutor};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Accepts only JSON objects: first byte must be '{'
const OBJECT_ONLY_MODULE: &str = r#"(module
    (memory (export "memory") 1)
    (global $next (mut i32) (i32.const 1024))
    (func (export "allocate") (param $size i32) (result i32)
        global.get $next
        global.get $next
        local.get $size
        i32.add
        global.set $next)
    (func (export "handle$element") (param $ptr i32) (param $len i32) (result i32)
        local.get $ptr
        i32.load8_u
        i32.const 123
        i32.ne))"#;

const SPIN_MODULE: &str = r#"(module (func (export "run") (loop $l (br $l))))"#;

/// Records every result produced by the wrapped executor
struct ObservedExecutor {
    inner: Arc<dyn FunctionExecutor>,
    results: Mutex<Vec<Result<String, String>>>,
}

impl ObservedExecutor {
    fn new(inner: Arc<dyn FunctionExecutor>) -> Self {
        Self {
            inner,
            results: Mutex::new(Vec::new()),
        }
    }

    fn results(&self) -> Vec<Result<String, String>> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl FunctionExecutor for ObservedExecutor {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        let result = self.inner.run(request).await;
        self.results.lock().unwrap().push(match &result {
            Ok(outcome) => Ok(outcome.entry_point.clone()),
            Err(e) => Err(e.to_string()),
        });
        result
    }
}

struct Engine {
    _tmp: TempDir,
    queues: Arc<FileQueueStore>,
    blobs: Arc<FileBlobStore>,
    executor: Arc<ObservedExecutor>,
    dispatcher: Arc<QueueTriggerDispatcher>,
    shutdown: ShutdownSender,
    scratch_dir: std::path::PathBuf,
}

fn fast_workers() -> WorkerConfig {
    WorkerConfig {
        dequeue_wait: Duration::from_millis(100),
        error_backoff: Duration::from_millis(20),
    }
}

fn engine(execution_timeout: Duration) -> Engine {
    let tmp = TempDir::new().unwrap();
    let scratch_dir = tmp.path().join("scratch");
    let queues = Arc::new(FileQueueStore::new(
        QueueStorageOptions::new(tmp.path().join("queues")),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let blobs = Arc::new(FileBlobStore::new(tmp.path().join("blobs")));
    let sandbox = Arc::new(SandboxExecutor::new(
        blobs.clone(),
        SandboxConfig::new(&scratch_dir).with_execution_timeout(execution_timeout),
    ));
    let executor = Arc::new(ObservedExecutor::new(sandbox));

    let (shutdown, token) = shutdown_channel();
    let dispatcher = Arc::new(QueueTriggerDispatcher::new(
        queues.clone(),
        executor.clone(),
        token,
        fast_workers(),
    ));

    Engine {
        _tmp: tmp,
        queues,
        blobs,
        executor,
        dispatcher,
        shutdown,
        scratch_dir,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < Duration::from_secs(10), "timed out waiting");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn wasm_info(name: &str) -> BlobInfo {
    BlobInfo::new(format!("{}.wasm", name), "application/wasm")
}

/// Test 1: Enqueued messages run the bound wasm function; failures don't stop the loop
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_messages_trigger_wasm_function() {
    let e = engine(Duration::from_secs(10));
    let module = wat::parse_str(OBJECT_ONLY_MODULE).unwrap();
    e.blobs.put("resizer", &module, &wasm_info("resizer")).await.unwrap();

    e.dispatcher.activate("resizer", "handle", "images").await.unwrap();

    e.queues.enqueue("images", &json!({"id": 1})).await.unwrap();
    e.queues.enqueue("images", &json!("not an object")).await.unwrap();
    e.queues.enqueue("images", &json!({"id": 3})).await.unwrap();

    wait_for(|| e.executor.results().len() == 3).await;
    let results = e.executor.results();
    assert_eq!(results[0], Ok("handle$element".to_string()));
    assert!(results[1].as_ref().unwrap_err().contains("status 1"));
    assert_eq!(results[2], Ok("handle$element".to_string()));

    assert_eq!(e.queues.stats().await.unwrap()[0].message_count, 0);
    assert_eq!(std::fs::read_dir(&e.scratch_dir).unwrap().count(), 0);

    e.dispatcher.shutdown().await;
}

/// Test 2: Deactivated bindings leave messages in the queue
#[tokio::test]
async fn test_binding_lifecycle_with_test_double() {
    let tmp = TempDir::new().unwrap();
    let queues = Arc::new(FileQueueStore::new(
        QueueStorageOptions::new(tmp.path()),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let executor = Arc::new(RecordingExecutor::new_success());
    let (_shutdown, token) = shutdown_channel();
    let dispatcher = Arc::new(QueueTriggerDispatcher::new(
        queues.clone(),
        executor.clone(),
        token.clone(),
        fast_workers(),
    ));
    let service = QueueService::new(queues.clone(), dispatcher.clone(), token);

    service
        .activate_trigger(TriggerRequest {
            function_blob_id: "fn-1".to_string(),
            function_name: "run".to_string(),
            queue: "jobs".to_string(),
        })
        .await
        .unwrap();

    service.enqueue("jobs", &json!({"n": 1})).await.unwrap();
    wait_for(|| executor.call_count() == 1).await;
    assert_eq!(executor.payloads(), vec![json!({"n": 1})]);

    service.deactivate_trigger("fn-1").await.unwrap();
    assert!(dispatcher.bindings().await.is_empty());

    service.enqueue("jobs", &json!({"n": 2})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(executor.call_count(), 1);
    assert_eq!(service.stats().await.unwrap()[0].message_count, 1);

    // Reactivation picks up the backlog
    dispatcher.activate("fn-1", "run", "jobs").await.unwrap();
    wait_for(|| executor.call_count() == 2).await;

    dispatcher.shutdown().await;
}

/// Test 3: Replacing a binding leaves exactly one worker, on the new queue
#[tokio::test]
async fn test_replacement_leaves_one_worker() {
    let e = engine(Duration::from_secs(10));

    e.dispatcher.activate("fn", "run", "old").await.unwrap();
    e.dispatcher.activate("fn", "run", "new").await.unwrap();
    e.dispatcher.activate("fn", "run", "new").await.unwrap();

    let bindings = e.dispatcher.bindings().await;
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].queue.as_str(), "new");
    assert_eq!(
        e.dispatcher.worker_state("fn").await,
        Some(WorkerState::Running)
    );

    e.dispatcher.shutdown().await;
}

/// Test 4: Host shutdown cancels a running guest promptly
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_interrupts_in_flight_invocation() {
    let e = engine(Duration::from_secs(60));
    let module = wat::parse_str(SPIN_MODULE).unwrap();
    e.blobs.put("spin", &module, &wasm_info("spin")).await.unwrap();

    e.dispatcher.activate("spin", "run", "work").await.unwrap();
    e.queues.enqueue("work", &json!(null)).await.unwrap();
    // Let the invocation start
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    e.shutdown.shutdown();
    e.dispatcher.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    wait_for(|| e.executor.results().len() == 1).await;
    assert!(e.executor.results()[0]
        .as_ref()
        .unwrap_err()
        .contains("cancelled"));
    assert!(e.dispatcher.bindings().await.is_empty());
}

/// Test 5: Execution timeout bounds a runaway guest and the worker keeps going
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_does_not_stop_worker() {
    let e = engine(Duration::from_millis(200));
    let module = wat::parse_str(SPIN_MODULE).unwrap();
    e.blobs.put("spin", &module, &wasm_info("spin")).await.unwrap();

    e.dispatcher.activate("spin", "run", "work").await.unwrap();
    e.queues.enqueue("work", &json!(1)).await.unwrap();
    e.queues.enqueue("work", &json!(2)).await.unwrap();

    wait_for(|| e.executor.results().len() == 2).await;
    for result in e.executor.results() {
        assert!(result.unwrap_err().contains("timed out"));
    }
    assert_eq!(
        e.dispatcher.worker_state("spin").await,
        Some(WorkerState::Running)
    );

    e.dispatcher.shutdown().await;
}

/// Test 6: Bindings are rebuilt from blob metadata on startup
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recovery_restores_bindings_from_metadata() {
    let e = engine(Duration::from_secs(10));
    let module = wat::parse_str(OBJECT_ONLY_MODULE).unwrap();
    e.blobs
        .put(
            "resizer",
            &module,
            &wasm_info("resizer")
                .with_metadata(TRIGGER_QUEUE_KEY, "images")
                .with_metadata("function-name", "handle"),
        )
        .await
        .unwrap();
    e.blobs
        .put("library", &module, &wasm_info("library"))
        .await
        .unwrap();

    let report = BindingRecovery::new(e.blobs.clone(), e.dispatcher.clone())
        .restore_bindings()
        .await
        .unwrap();
    assert_eq!(report.activated, 1);
    assert_eq!(report.failed, 0);

    e.queues.enqueue("images", &json!({"id": 42})).await.unwrap();
    wait_for(|| e.executor.results().len() == 1).await;
    assert_eq!(e.executor.results()[0], Ok("handle$element".to_string()));

    e.dispatcher.shutdown().await;
}

/// Test 7: Activation after shutdown is refused
#[tokio::test]
async fn test_activation_after_shutdown_is_refused() {
    let e = engine(Duration::from_secs(10));
    e.dispatcher.activate("a", "run", "q1").await.unwrap();
    e.dispatcher.activate("b", "run", "q2").await.unwrap();

    e.dispatcher.shutdown().await;
    assert!(e.dispatcher.bindings().await.is_empty());
    assert!(e.dispatcher.activate("c", "run", "q3").await.is_err());
}
