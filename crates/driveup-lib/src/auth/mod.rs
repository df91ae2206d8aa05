//! OAuth2 authorization for Google Drive accounts.
//!
//! - [`token`]: per-account token lifecycle (cache, refresh, interactive authorization)
//! - [`oauth`]: the `oauth2`-backed [`Authorizer`]
//! - [`callback`]: short-lived local listener that receives the authorization code

pub mod callback;
pub mod oauth;
pub mod token;

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{DriveUpError, Result};

pub use callback::{CallbackListener, LoopbackCodeSource};
pub use oauth::{Authorizer, ClientSecrets, OAuthAuthorizer};
pub use token::{CodeSource, Token, TokenManager, TokenState};

/// Full read/write Drive scope.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const STATE_LEN: usize = 32;
const STATE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Supplies the bearer credential for each remote request.
#[async_trait]
pub trait BearerSource: Send + Sync {
    async fn bearer(&self) -> Result<String>;
}

/// A fixed bearer token, for tests against mock servers.
#[cfg(any(test, feature = "test-utils"))]
pub struct StaticBearer(pub String);

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl BearerSource for StaticBearer {
    async fn bearer(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Random alphanumeric anti-forgery value for one authorization attempt.
pub fn random_state() -> Result<String> {
    let mut bytes = [0u8; STATE_LEN];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| DriveUpError::Authorization("failed to generate state value".into()))?;
    Ok(bytes
        .iter()
        .map(|b| STATE_ALPHABET[*b as usize % STATE_ALPHABET.len()] as char)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_state_shape() {
        let a = random_state().unwrap();
        let b = random_state().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_static_bearer() {
        let source = StaticBearer("abc".into());
        assert_eq!(source.bearer().await.unwrap(), "abc");
    }
}
