//! Authenticated handles for every enabled account.
//!
//! [`AccountRegistry::build`] connects each enabled account in declaration
//! order. The first account that connects becomes the default; lookups by
//! id are a linear scan over the (small) handle list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::{CodeSource, LoopbackCodeSource, OAuthAuthorizer, TokenManager};
use crate::cloud::gdrive::DriveBackend;
use crate::cloud::StorageBackend;
use crate::config::{AccountConfig, Settings};
use crate::crypto::CredentialStore;
use crate::errors::{DriveUpError, Result};
use crate::http_client::HttpClient;

pub use crate::config::BuildPolicy;

// ---------------------------------------------------------------------------
// AccountHandle
// ---------------------------------------------------------------------------

/// An account's configuration paired with its authenticated backend.
#[derive(Clone)]
pub struct AccountHandle {
    config: AccountConfig,
    backend: Arc<dyn StorageBackend>,
}

impl AccountHandle {
    pub fn new(config: AccountConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Destination folder, `None` for the root.
    pub fn folder(&self) -> Option<&str> {
        self.config.destination_folder()
    }
}

impl std::fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHandle")
            .field("id", &self.config.id)
            .field("backend", &self.backend.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Turns one account's configuration into an authenticated backend.
#[async_trait]
pub trait AccountConnector: Send + Sync {
    async fn connect(
        &self,
        account: &AccountConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn StorageBackend>>;
}

/// Connects Google Drive accounts: credentials, token lifecycle, backend.
pub struct DriveConnector {
    store: CredentialStore,
    http: HttpClient,
    redirect_url: String,
    codes: Arc<dyn CodeSource>,
    auth_timeout: Duration,
}

impl DriveConnector {
    pub fn new(
        store: CredentialStore,
        http: HttpClient,
        redirect_url: impl Into<String>,
        codes: Arc<dyn CodeSource>,
    ) -> Self {
        Self {
            store,
            http,
            redirect_url: redirect_url.into(),
            codes,
            auth_timeout: crate::auth::token::DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Connector using the loopback listener and timeouts from `settings`.
    pub fn from_settings(settings: &Settings, store: CredentialStore, http: HttpClient) -> Self {
        let codes = Arc::new(LoopbackCodeSource::new(
            settings.oauth_callback_host_port.clone(),
            settings.open_browser,
        ));
        Self::new(store, http, settings.redirect_url(), codes)
            .with_auth_timeout(settings.auth_timeout())
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

#[async_trait]
impl AccountConnector for DriveConnector {
    async fn connect(
        &self,
        account: &AccountConfig,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn StorageBackend>> {
        let secrets = self.store.reveal(&account.credentials_file).await?;
        let authorizer = Arc::new(OAuthAuthorizer::from_credentials_json(
            &secrets,
            &self.redirect_url,
        )?);

        let tokens = Arc::new(
            TokenManager::new(
                &account.id,
                account.token_path(),
                self.store.clone(),
                authorizer,
                Arc::clone(&self.codes),
            )
            .with_auth_timeout(self.auth_timeout)
            .with_cancellation(cancel.clone()),
        );
        tokens.acquire().await?;

        Ok(Arc::new(DriveBackend::new(self.http.clone(), tokens)))
    }
}

// ---------------------------------------------------------------------------
// AccountRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AccountRegistry {
    handles: Vec<AccountHandle>,
    default_index: usize,
}

impl AccountRegistry {
    /// Connect every enabled account in `accounts`.
    pub async fn build(
        accounts: &[AccountConfig],
        connector: &dyn AccountConnector,
        policy: BuildPolicy,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut handles = Vec::new();

        for account in accounts {
            if !account.enable {
                tracing::debug!(account = %account.id, "Account disabled, skipping");
                continue;
            }
            if cancel.is_cancelled() {
                return Err(DriveUpError::Cancelled);
            }

            match connector.connect(account, cancel).await {
                Ok(backend) => {
                    tracing::info!(account = %account.id, backend = backend.name(), "Account ready");
                    handles.push(AccountHandle::new(account.clone(), backend));
                }
                Err(DriveUpError::Cancelled) => return Err(DriveUpError::Cancelled),
                Err(e) => match policy {
                    BuildPolicy::FailFast => return Err(e),
                    BuildPolicy::BestEffort => {
                        tracing::warn!(account = %account.id, error = %e, "Account unavailable, skipping");
                    }
                },
            }
        }

        Self::from_handles(handles)
    }

    /// Registry over pre-built handles; the first one is the default.
    pub fn from_handles(handles: Vec<AccountHandle>) -> Result<Self> {
        if handles.is_empty() {
            return Err(DriveUpError::Config(
                "no usable accounts: enable at least one entry in config_google_drives".into(),
            ));
        }
        Ok(Self {
            handles,
            default_index: 0,
        })
    }

    /// Handle for `account_id`; empty or absent selects the default.
    pub fn resolve(&self, account_id: Option<&str>) -> Result<&AccountHandle> {
        match account_id.map(str::trim).filter(|id| !id.is_empty()) {
            None => Ok(self.default_handle()),
            Some(id) => self
                .handles
                .iter()
                .find(|h| h.id() == id)
                .ok_or_else(|| DriveUpError::Config(format!("unknown account id '{id}'"))),
        }
    }

    pub fn handles(&self) -> &[AccountHandle] {
        &self.handles
    }

    pub fn default_handle(&self) -> &AccountHandle {
        &self.handles[self.default_index]
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
