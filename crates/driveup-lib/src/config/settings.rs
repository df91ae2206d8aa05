use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::errors::{DriveUpError, Result};

/// How the account registry treats a single account that fails to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Any account failure aborts the whole build.
    #[default]
    FailFast,
    /// Failures are logged; the build succeeds if one account connected.
    BestEffort,
}

/// One configured upload destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub id: String,
    #[serde(rename = "google_credentials_file")]
    pub credentials_file: PathBuf,
    /// How many copies of one filename the destination keeps.
    pub upload_copies_count: u32,
    pub folder_id: Option<String>,
    pub enable: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: "0".into(),
            credentials_file: PathBuf::from("google_credentials.json"),
            upload_copies_count: 1,
            folder_id: None,
            enable: true,
        }
    }
}

impl AccountConfig {
    /// Destination folder id; `None` (or an empty string in YAML) means the root.
    pub fn destination_folder(&self) -> Option<&str> {
        self.folder_id.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    /// Copies allowed to remain before a new upload is added.
    pub fn keep_before_upload(&self) -> usize {
        self.upload_copies_count.saturating_sub(1) as usize
    }

    /// Sidecar token path: `<dir>/<stem>_token.json`.
    pub fn token_path(&self) -> PathBuf {
        let stem = self
            .credentials_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.credentials_file
            .with_file_name(format!("{stem}_token.json"))
    }
}

/// HTTP client tuning for the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    /// Per-read inactivity timeout; uploads have no total deadline.
    pub read_timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 120,
            pool_idle_timeout_secs: 90,
        }
    }
}

/// Application settings loaded from one or more YAML files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub oauth_callback_host_port: String,
    pub auth_timeout_secs: u64,
    pub progress_interval_secs: u64,
    pub registry_policy: BuildPolicy,
    pub open_browser: bool,
    pub credential_secret: Option<String>,
    pub http: HttpSettings,
    #[serde(rename = "config_google_drives")]
    pub accounts: Vec<AccountConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            oauth_callback_host_port: "localhost:8080".into(),
            auth_timeout_secs: 300,
            progress_interval_secs: 60,
            registry_policy: BuildPolicy::FailFast,
            open_browser: true,
            credential_secret: None,
            http: HttpSettings::default(),
            accounts: Vec::new(),
        }
    }
}

impl Settings {
    /// Load and validate settings from `paths`, later files overriding earlier ones.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = Value::Null;
        for path in paths {
            let text = std::fs::read_to_string(path).map_err(|e| {
                DriveUpError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            let value: Value = serde_yaml::from_str(&text).map_err(|e| {
                DriveUpError::Config(format!("failed to parse {}: {e}", path.display()))
            })?;
            merge(&mut merged, value);
        }
        let settings = Self::from_value(merged)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a single YAML document without validation.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_value(serde_yaml::from_str(text)?)
    }

    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_value(value)?)
    }

    /// Check callback address, account id uniqueness and credentials files.
    pub fn validate(&self) -> Result<()> {
        let (host, port) = self
            .oauth_callback_host_port
            .rsplit_once(':')
            .ok_or_else(|| {
                DriveUpError::Config(format!(
                    "oauth_callback_host_port '{}' must be host:port",
                    self.oauth_callback_host_port
                ))
            })?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(DriveUpError::Config(format!(
                "oauth_callback_host_port '{}' must be host:port",
                self.oauth_callback_host_port
            )));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id.as_str()) {
                return Err(DriveUpError::Config(format!(
                    "duplicate account id '{}'",
                    account.id
                )));
            }
            if account.enable && !Path::new(&account.credentials_file).exists() {
                return Err(DriveUpError::Config(format!(
                    "credentials file for account '{}' not found: {}",
                    account.id,
                    account.credentials_file.display()
                )));
            }
        }
        Ok(())
    }

    /// Redirect URL served by the local callback listener.
    pub fn redirect_url(&self) -> String {
        format!("http://{}/oauth2/callback", self.oauth_callback_host_port)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }

    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enable)
    }

    /// The credential secret: `env_secret` wins over the YAML value.
    pub fn resolve_secret<'a>(&'a self, env_secret: Option<&'a str>) -> Option<&'a str> {
        env_secret
            .filter(|s| !s.is_empty())
            .or(self.credential_secret.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Overlay `overlay` onto `base`: mappings merge key by key, anything else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}
