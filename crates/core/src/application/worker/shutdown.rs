// Worker Shutdown Token

use tokio_util::sync::CancellationToken;

/// Shutdown signal for graceful termination
///
/// Workers derive their own switch from it with [`ShutdownToken::child`], so
/// host shutdown stops every worker while a single worker can still be
/// stopped on its own.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    token: CancellationToken,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancellation that fires on host shutdown or when cancelled itself
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    token: CancellationToken,
}

impl ShutdownSender {
    /// Signal shutdown to all workers
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let token = CancellationToken::new();
    (
        ShutdownSender {
            token: token.clone(),
        },
        ShutdownToken { token },
    )
}
