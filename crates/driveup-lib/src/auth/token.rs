//! Per-account token lifecycle.
//!
//! [`TokenManager`] turns whatever is cached on disk into a usable access
//! token: a valid cached token is returned as is, an expired one gets a
//! single refresh attempt, and everything else falls through to an
//! interactive authorization round-trip through a [`CodeSource`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::auth::oauth::Authorizer;
use crate::auth::{random_state, BearerSource};
use crate::crypto::CredentialStore;
use crate::errors::{CredentialFault, DriveUpError, Result};
use crate::signal::cancellable;

/// Tokens expiring within this window are treated as already expired.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(10);

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Persisted OAuth2 token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// A bearer token with no expiry.
    pub fn bearer(access_token: impl Into<String>, refresh_token: Option<&str>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.map(str::to_string),
            token_type: default_token_type(),
            expiry: None,
            scope: None,
        }
    }

    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Non-empty access token, and no expiry or one beyond `now + EXPIRY_SKEW`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            None => true,
            Some(expiry) => {
                let skew = chrono::Duration::from_std(EXPIRY_SKEW).unwrap_or_default();
                expiry > now + skew
            }
        }
    }

    /// Keep `previous`'s refresh token when the refreshed one has none.
    fn inherit_refresh_token(mut self, previous: &Token) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        self
    }
}

/// Lifecycle state of a cached token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Valid,
    ExpiredRefreshable,
    ExpiredTerminal,
    AwaitingAuthorization,
}

impl TokenState {
    pub fn classify(token: Option<&Token>) -> Self {
        Self::classify_at(token, Utc::now())
    }

    pub fn classify_at(token: Option<&Token>, now: DateTime<Utc>) -> Self {
        match token {
            None => TokenState::Absent,
            Some(t) if t.is_valid_at(now) => TokenState::Valid,
            Some(t) if t.refresh_token.as_deref().is_some_and(|r| !r.is_empty()) => {
                TokenState::ExpiredRefreshable
            }
            Some(_) => TokenState::ExpiredTerminal,
        }
    }
}

// ---------------------------------------------------------------------------
// CodeSource
// ---------------------------------------------------------------------------

/// Interactive step of authorization: show `auth_url`, return the code.
#[async_trait]
pub trait CodeSource: Send + Sync {
    async fn obtain_code(
        &self,
        auth_url: &str,
        state: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

/// Produces a valid access token for one account.
pub struct TokenManager {
    account: String,
    token_path: PathBuf,
    store: CredentialStore,
    authorizer: Arc<dyn Authorizer>,
    codes: Arc<dyn CodeSource>,
    auth_timeout: Duration,
    cancel: CancellationToken,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        account: impl Into<String>,
        token_path: impl Into<PathBuf>,
        store: CredentialStore,
        authorizer: Arc<dyn Authorizer>,
        codes: Arc<dyn CodeSource>,
    ) -> Self {
        Self {
            account: account.into(),
            token_path: token_path.into(),
            store,
            authorizer,
            codes,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            cancel: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Token cancelled on shutdown; interrupts authorization waits and exchanges.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn token_path(&self) -> &std::path::Path {
        &self.token_path
    }

    /// Read the sidecar and run the lifecycle until a valid token exists.
    pub async fn acquire(&self) -> Result<Token> {
        let mut current = self.current.lock().await;
        let cached = self.load_cached().await;
        let token = self.resolve(cached).await?;
        *current = Some(token.clone());
        Ok(token)
    }

    /// The in-memory access token, re-running the lifecycle once it expires.
    pub async fn access_token(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.access_token.clone());
        }
        let cached = match current.take() {
            Some(token) => Some(token),
            None => self.load_cached().await,
        };
        let token = self.resolve(cached).await?;
        let access = token.access_token.clone();
        *current = Some(token);
        Ok(access)
    }

    async fn resolve(&self, cached: Option<Token>) -> Result<Token> {
        let state = TokenState::classify(cached.as_ref());
        tracing::debug!(account = %self.account, ?state, "Token state");

        match (state, cached) {
            (TokenState::Valid, Some(token)) => return Ok(token),
            (TokenState::ExpiredRefreshable, Some(token)) => {
                match cancellable(&self.cancel, self.authorizer.refresh(&token)).await {
                    Ok(fresh) => {
                        let fresh = fresh.inherit_refresh_token(&token);
                        tracing::info!(account = %self.account, "Access token refreshed");
                        self.persist(&fresh).await;
                        return Ok(fresh);
                    }
                    Err(DriveUpError::Cancelled) => return Err(DriveUpError::Cancelled),
                    Err(e) => {
                        tracing::warn!(
                            account = %self.account,
                            error = %e,
                            "Token refresh failed, re-authorization required"
                        );
                    }
                }
            }
            _ => {}
        }

        self.authorize_interactively().await
    }

    async fn authorize_interactively(&self) -> Result<Token> {
        tracing::debug!(account = %self.account, state = ?TokenState::AwaitingAuthorization, "Token state");
        let state = random_state()?;
        let url = self.authorizer.authorization_url(&state)?;
        let code = self
            .codes
            .obtain_code(&url, &state, self.auth_timeout, &self.cancel)
            .await?;
        let token = cancellable(&self.cancel, self.authorizer.exchange_code(&code)).await?;
        tracing::info!(account = %self.account, "Authorization complete");
        self.persist(&token).await;
        Ok(token)
    }

    /// Cached sidecar token; any failure to read or parse counts as absent.
    async fn load_cached(&self) -> Option<Token> {
        let bytes = match self.store.reveal(&self.token_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.credential_fault() == Some(CredentialFault::NotFound) {
                    tracing::debug!(account = %self.account, path = %self.token_path.display(), "No cached token");
                } else {
                    tracing::warn!(account = %self.account, error = %e, "Cached token unreadable");
                }
                return None;
            }
        };
        match serde_json::from_slice::<Token>(&bytes) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(account = %self.account, error = %e, "Cached token is not valid JSON");
                None
            }
        }
    }

    /// Write the token sidecar; failures are logged and swallowed.
    async fn persist(&self, token: &Token) {
        let result = match serde_json::to_vec_pretty(token) {
            Ok(bytes) => self.store.write_protected(&self.token_path, &bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(
                account = %self.account,
                path = %self.token_path.display(),
                error = %e,
                "Failed to persist token"
            );
        }
    }
}

#[async_trait]
impl BearerSource for TokenManager {
    async fn bearer(&self) -> Result<String> {
        self.access_token().await
    }
}
