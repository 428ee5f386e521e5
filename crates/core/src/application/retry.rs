// Retry logic for transient storage faults

use crate::error::{AppError, Result};
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tracing::warn;

/// Default number of attempts (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Bounded exponential backoff for file I/O and (de)serialization
///
/// Only I/O and serialization faults are retried. Quota and lock-timeout
/// errors are backpressure signals and go straight back to the caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first (at least 1)
    /// * `base_delay` - Delay before the first retry
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor: 2.0,
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    ///
    /// delay = base_delay * (backoff_factor ^ attempt) * (1.0 ± 0.1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        // ±10% jitter so concurrent retries do not line up
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        Duration::from_secs_f64(base * jitter)
    }

    /// Run `op`, retrying transient failures
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(exhausted(operation, attempt, e));
                    }

                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        operation = %operation,
                        attempt = %attempt,
                        max_attempts = %self.max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn is_transient(error: &AppError) -> bool {
    match error {
        AppError::Io(e) => !matches!(
            e.kind(),
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput
        ),
        AppError::Serialization(_) => true,
        _ => false,
    }
}

fn exhausted(operation: &str, attempts: u32, error: AppError) -> AppError {
    match &error {
        AppError::Io(e) if e.kind() == ErrorKind::TimedOut => AppError::OperationTimeout {
            operation: operation.to_string(),
            attempts,
        },
        _ => error,
    }
}
