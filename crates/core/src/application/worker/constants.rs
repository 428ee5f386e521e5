// Worker constants (No magic values)
use std::time::Duration;

/// How long one dequeue call waits before the loop re-checks cancellation
pub const DEQUEUE_WAIT_DURATION: Duration = Duration::from_secs(30);

/// Sleep duration after a dequeue-layer error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default wall-clock bound on one function invocation (5 minutes)
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
