//! Local HTTP listener that receives the OAuth2 authorization code.
//!
//! Each authorization attempt builds its own router and binds its own
//! socket; nothing is registered globally. [`CallbackListener::shutdown`]
//! returns only after the server task has finished, so the port can be
//! bound again straight away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::token::CodeSource;
use crate::errors::{DriveUpError, Result};
use crate::utils::browser;

pub const CALLBACK_PATH: &str = "/oauth2/callback";

/// How long `shutdown` waits for in-flight connections before aborting the task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>driveup</title></head>\
<body><h2>Authorization complete</h2>\
<p>You can close this window and return to the terminal.</p></body></html>";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    codes: mpsc::Sender<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
}

/// Router serving only `GET /oauth2/callback` for one attempt.
pub(crate) fn callback_router(expected_state: &str, codes: mpsc::Sender<String>) -> Router {
    let state = CallbackState {
        expected_state: Arc::from(expected_state),
        codes,
    };
    Router::new()
        .route(CALLBACK_PATH, get(handle_callback))
        .with_state(state)
}

fn state_matches(expected: &str, received: Option<&str>) -> bool {
    received.is_some_and(|r| {
        ring::constant_time::verify_slices_are_equal(expected.as_bytes(), r.as_bytes()).is_ok()
    })
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if !state_matches(&state.expected_state, params.state.as_deref()) {
        tracing::warn!("OAuth callback with mismatched state rejected");
        return (StatusCode::BAD_REQUEST, "State mismatch").into_response();
    }
    if let Some(err) = params.error {
        tracing::warn!(error = %err, "Authorization denied by provider");
        return (StatusCode::BAD_REQUEST, format!("Authorization failed: {err}")).into_response();
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code").into_response();
    };

    // Single slot: the first code wins, repeats (browser prefetch) are dropped.
    if state.codes.try_send(code).is_err() {
        tracing::debug!("Duplicate OAuth callback ignored");
    }
    Html(SUCCESS_PAGE).into_response()
}

// ---------------------------------------------------------------------------
// CallbackListener
// ---------------------------------------------------------------------------

/// A running callback server bound for a single authorization attempt.
pub struct CallbackListener {
    local_addr: SocketAddr,
    codes: mpsc::Receiver<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind `host_port` and start serving the callback route.
    pub async fn start(host_port: &str, expected_state: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        let router = callback_router(expected_state, tx);

        let listener = TcpListener::bind(host_port).await.map_err(|e| {
            DriveUpError::Authorization(format!(
                "failed to bind callback listener on {host_port}: {e}"
            ))
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "OAuth callback listener started");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "Callback listener failed");
            }
        });

        Ok(Self {
            local_addr,
            codes: rx,
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the first valid code, the timeout, or cancellation.
    pub async fn wait_for_code(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriveUpError::Cancelled),
            code = self.codes.recv() => code.ok_or_else(|| {
                DriveUpError::Authorization("callback listener stopped before a code arrived".into())
            }),
            _ = tokio::time::sleep(timeout) => Err(DriveUpError::Authorization(format!(
                "timed out after {}s waiting for the authorization callback",
                timeout.as_secs()
            ))),
        }
    }

    /// Stop the server and wait until its socket is closed.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
                tracing::warn!("Callback listener did not stop in time, aborting");
                server.abort();
                let _ = server.await;
            }
        }
        tracing::debug!(addr = %self.local_addr, "OAuth callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// LoopbackCodeSource
// ---------------------------------------------------------------------------

/// Obtains a code by opening the browser and listening on the loopback address.
pub struct LoopbackCodeSource {
    host_port: String,
    open_browser: bool,
}

impl LoopbackCodeSource {
    pub fn new(host_port: impl Into<String>, open_browser: bool) -> Self {
        Self {
            host_port: host_port.into(),
            open_browser,
        }
    }
}

#[async_trait]
impl CodeSource for LoopbackCodeSource {
    async fn obtain_code(
        &self,
        auth_url: &str,
        state: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut listener = CallbackListener::start(&self.host_port, state).await?;

        tracing::info!(url = %auth_url, "Open this URL in a browser to authorize access");
        if self.open_browser {
            if let Err(e) = browser::open_url(auth_url) {
                tracing::warn!(error = %e, "Could not open a browser; visit the URL manually");
            }
        }

        let result = listener.wait_for_code(timeout, cancel).await;
        listener.shutdown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn request(query: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("{CALLBACK_PATH}?{query}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_callback_delivers_code() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = callback_router("xyz", tx);

        let resp = app.oneshot(request("state=xyz&code=4/abc")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.as_deref(), Some("4/abc"));
    }

    #[test]
    fn test_state_matches() {
        assert!(state_matches("abc123", Some("abc123")));
        assert!(!state_matches("abc123", Some("abc124")));
        assert!(!state_matches("abc123", Some("abc")));
        assert!(!state_matches("abc123", None));
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = callback_router("xyz", tx);

        let resp = app.oneshot(request("state=other&code=abc")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_or_empty_code_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let app = callback_router("xyz", tx);

        let resp = app.clone().oneshot(request("state=xyz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app.oneshot(request("state=xyz&code=")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provider_error_rejected() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = callback_router("xyz", tx);

        let resp = app
            .oneshot(request("state=xyz&error=access_denied"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeat_callback_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let app = callback_router("xyz", tx);

        let first = app.clone().oneshot(request("state=xyz&code=one")).await.unwrap();
        let second = app.oneshot(request("state=xyz&code=two")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_then_port_rebinds() {
        let mut listener = CallbackListener::start("127.0.0.1:0", "xyz").await.unwrap();
        let addr = listener.local_addr();

        let err = listener
            .wait_for_code(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveUpError::Authorization(ref m) if m.contains("timed out")));

        listener.shutdown().await;
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok(), "port should be free after shutdown");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let mut listener = CallbackListener::start("127.0.0.1:0", "xyz").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = listener
            .wait_for_code(Duration::from_secs(300), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveUpError::Cancelled));
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_code_over_real_socket() {
        let mut listener = CallbackListener::start("127.0.0.1:0", "xyz").await.unwrap();
        let url = format!(
            "http://{}{CALLBACK_PATH}?state=xyz&code=live-code",
            listener.local_addr()
        );
        let client = tokio::spawn(async move { reqwest::get(url).await.map(|r| r.status()) });

        let code = listener
            .wait_for_code(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, "live-code");
        assert_eq!(client.await.unwrap().unwrap(), reqwest::StatusCode::OK);
        listener.shutdown().await;
    }
}
