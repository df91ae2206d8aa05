//! Shared HTTP client for the storage backend.
//!
//! Two clients share one configuration. The API client carries the read
//! timeout from settings. reqwest measures that timeout from `send()` until
//! the response arrives, body upload included, so streamed uploads go
//! through the transfer client, which only bounds connecting and idle
//! pooling. Both are cheap to clone and shared across accounts.

use std::time::Duration;

use crate::config::HttpSettings;
use crate::errors::{DriveUpError, Result};

#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    transfer: reqwest::Client,
}

impl HttpClient {
    /// Build a new `HttpClient` configured from `settings`.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let read_timeout = Duration::from_secs(settings.read_timeout_secs);
        Ok(Self {
            inner: Self::builder(settings)
                .read_timeout(read_timeout)
                .build()
                .map_err(DriveUpError::Http)?,
            transfer: Self::builder(settings).build().map_err(DriveUpError::Http)?,
        })
    }

    pub fn from_defaults() -> Result<Self> {
        Self::new(&HttpSettings::default())
    }

    /// Client for API calls, bounded by the configured read timeout.
    pub fn client(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Client for request bodies of unbounded duration; no read timeout.
    pub fn transfer_client(&self) -> &reqwest::Client {
        &self.transfer
    }

    fn builder(settings: &HttpSettings) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_secs))
            .user_agent(concat!("driveup/", env!("CARGO_PKG_VERSION")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_defaults() {
        let client = HttpClient::from_defaults().expect("should build from defaults");
        let _inner = client.client();
    }

    #[test]
    fn test_custom_settings() {
        let settings = HttpSettings {
            connect_timeout_secs: 1,
            read_timeout_secs: 5,
            pool_idle_timeout_secs: 0,
        };
        let client = HttpClient::new(&settings).expect("should build with custom settings");
        let cloned = client.clone();
        let _inner = cloned.client();
        let _transfer = cloned.transfer_client();
    }
}
