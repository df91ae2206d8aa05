use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;

use crate::auth::token::Token;
use crate::auth::DRIVE_SCOPE;
use crate::errors::{DriveUpError, Result};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Builds consent URLs, exchanges codes and refreshes tokens.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Consent URL bound to the anti-forgery `state`.
    fn authorization_url(&self, state: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<Token>;

    /// Refresh `token`; the result may lack a refresh token of its own.
    async fn refresh(&self, token: &Token) -> Result<Token>;
}

// ---------------------------------------------------------------------------
// Client secrets
// ---------------------------------------------------------------------------

/// OAuth client identity from a Google Cloud console credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse the `installed` (or `web`) section of a credentials JSON file.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_slice(bytes).map_err(|e| {
            DriveUpError::Config(format!("unable to parse client secret file: {e}"))
        })?;
        file.installed.or(file.web).ok_or_else(|| {
            DriveUpError::Config(
                "client secret file has neither an 'installed' nor a 'web' section".into(),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// OAuthAuthorizer
// ---------------------------------------------------------------------------

/// [`Authorizer`] backed by the `oauth2` crate against Google's endpoints.
pub struct OAuthAuthorizer {
    client: GoogleClient,
    http: oauth2::reqwest::Client,
}

impl OAuthAuthorizer {
    pub fn new(secrets: &ClientSecrets, redirect_url: &str) -> Result<Self> {
        let auth_url = AuthUrl::new(secrets.auth_uri.clone())
            .map_err(|e| DriveUpError::Config(format!("Invalid auth URL: {e}")))?;
        let token_url = TokenUrl::new(secrets.token_uri.clone())
            .map_err(|e| DriveUpError::Config(format!("Invalid token URL: {e}")))?;
        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| DriveUpError::Config(format!("Invalid redirect URI: {e}")))?;

        let mut client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = &secrets.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        // Token requests must not follow redirects.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DriveUpError::Authorization(format!("failed to build OAuth client: {e}")))?;

        Ok(Self { client, http })
    }

    /// Parse `bytes` as a credentials file and build the authorizer.
    pub fn from_credentials_json(bytes: &[u8], redirect_url: &str) -> Result<Self> {
        Self::new(&ClientSecrets::from_json(bytes)?, redirect_url)
    }
}

fn token_from_response(resp: &BasicTokenResponse) -> Token {
    Token {
        access_token: resp.access_token().secret().clone(),
        refresh_token: resp.refresh_token().map(|t| t.secret().clone()),
        token_type: "Bearer".to_string(),
        expiry: resp
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d),
        scope: resp.scopes().map(|scopes| {
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }),
    }
}

#[async_trait]
impl Authorizer for OAuthAuthorizer {
    fn authorization_url(&self, state: &str) -> Result<String> {
        let state = state.to_string();
        let (url, _csrf) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .url();
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<Token> {
        let resp = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| DriveUpError::Authorization(format!("Token exchange failed: {e}")))?;
        Ok(token_from_response(&resp))
    }

    async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh = token
            .refresh_token
            .clone()
            .ok_or_else(|| DriveUpError::Authorization("No refresh token available".into()))?;
        let resp = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh))
            .request_async(&self.http)
            .await
            .map_err(|e| DriveUpError::Authorization(format!("Token refresh failed: {e}")))?;
        Ok(token_from_response(&resp))
    }
}
