//! `Services`: shared state handed to every command handler.
//!
//! The account registry is built lazily on first use so that commands such
//! as `accounts` never trigger authentication.

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::accounts::{AccountRegistry, DriveConnector};
use crate::config::{AccountConfig, Settings};
use crate::crypto::{CredentialStore, KeyContext};
use crate::errors::{DriveUpError, Result};
use crate::http_client::HttpClient;

pub struct Services {
    pub settings: Settings,
    /// Print results as JSON.
    pub json: bool,
    pub cancel: CancellationToken,
    secret: Option<String>,
    http: HttpClient,
    registry: OnceCell<AccountRegistry>,
}

impl Services {
    pub fn new(
        settings: Settings,
        secret: Option<String>,
        json: bool,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let http = HttpClient::new(&settings.http)?;
        Ok(Self {
            settings,
            json,
            cancel,
            secret,
            http,
            registry: OnceCell::new(),
        })
    }

    pub fn credential_store(&self) -> Result<CredentialStore> {
        let secret = self.settings.resolve_secret(self.secret.as_deref());
        CredentialStore::new(&KeyContext::for_this_host(secret))
    }

    /// Registry over every enabled account, built on first call.
    pub async fn registry(&self) -> Result<&AccountRegistry> {
        self.registry
            .get_or_try_init(|| self.build_registry(&self.settings.accounts))
            .await
    }

    /// Build a fresh registry over `accounts` only.
    pub async fn build_registry(&self, accounts: &[AccountConfig]) -> Result<AccountRegistry> {
        let connector =
            DriveConnector::from_settings(&self.settings, self.credential_store()?, self.http.clone());
        AccountRegistry::build(
            accounts,
            &connector,
            self.settings.registry_policy,
            &self.cancel,
        )
        .await
    }

    /// Configured accounts selected by `id`; all of them when `None`.
    pub fn select_accounts(&self, id: Option<&str>) -> Result<Vec<AccountConfig>> {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            None => Ok(self.settings.accounts.clone()),
            Some(id) => self
                .settings
                .accounts
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .map(|a| vec![a])
                .ok_or_else(|| DriveUpError::Config(format!("unknown account id '{id}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> Services {
        let settings = Settings::from_yaml_str(
            "config_google_drives:\n  - id: a\n    enable: false\n  - id: b\n    enable: false\n",
        )
        .unwrap();
        Services::new(settings, None, false, CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_select_accounts() {
        let s = services();
        assert_eq!(s.select_accounts(None).unwrap().len(), 2);
        assert_eq!(s.select_accounts(Some("b")).unwrap()[0].id, "b");
        assert!(matches!(
            s.select_accounts(Some("zzz")),
            Err(DriveUpError::Config(m)) if m.contains("zzz")
        ));
    }

    #[tokio::test]
    async fn test_registry_with_only_disabled_accounts_fails() {
        let s = services();
        let err = s.registry().await.unwrap_err();
        assert!(matches!(err, DriveUpError::Config(m) if m.contains("no usable accounts")));
    }
}
