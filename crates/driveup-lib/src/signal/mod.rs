use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::errors::{DriveUpError, Result};

/// Run `fut` until it completes or `cancel` fires.
///
/// On cancellation the in-flight future is dropped and `Cancelled` returned.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DriveUpError::Cancelled),
        res = fut => res,
    }
}

/// Cancels a shared token on SIGINT (Ctrl+C) or SIGTERM.
///
/// Spawn `listen()` in the background and hand `token()` clones to the
/// upload and authorization paths so they can stop early.
pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    pub async fn listen(&self) {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "Ctrl+C handler unavailable");
                    std::future::pending::<()>().await;
                }
                tracing::info!("Received SIGINT, cancelling...");
            }
            _ = Self::sigterm() => {
                tracing::info!("Received SIGTERM, cancelling...");
            }
        }
        self.token.cancel();
    }

    /// Spawn `listen()` onto the runtime and return the token.
    pub fn install() -> CancellationToken {
        let handler = Self::new();
        let token = handler.token();
        tokio::spawn(async move { handler.listen().await });
        token
    }

    #[cfg(unix)]
    async fn sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn sigterm() {
        std::future::pending::<()>().await;
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
