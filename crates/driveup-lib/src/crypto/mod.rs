//! Host-bound protection of small secret files (OAuth client JSON, tokens).
//!
//! A protected file is `DRIVEUP_ENCRYPTED:` followed by base64 of
//! `nonce || AES-256-GCM ciphertext || tag`. The key is derived with
//! PBKDF2-HMAC-SHA256 from a configured secret, salted with the host name and
//! local user. A file protected on one host (or under another user or secret)
//! does not decrypt anywhere else: this guards secrets at rest on one machine
//! and is not a portable encryption format.
//!
//! [`CredentialStore::reveal`] migrates plaintext files in place on first read
//! and still returns the original bytes, so callers never see the difference.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{CredentialFault, DriveUpError, Result};

/// Prefix that marks a file as protected.
pub const ENCRYPTED_MARKER: &str = "DRIVEUP_ENCRYPTED:";

/// Secret used when neither the config nor `DRIVEUP_SECRET` provides one.
pub const FALLBACK_SECRET: &str = "driveup-local-credential-secret";

const DEFAULT_ITERATIONS: u32 = 100_000;
const SALT_PREFIX: &str = "driveup/credential-store/v1/";
const TAG_LEN: usize = 16;

/// Key derivation inputs: the secret plus the host/user binding used as salt.
#[derive(Debug, Clone)]
pub struct KeyContext {
    secret: Vec<u8>,
    binding: String,
    iterations: u32,
}

impl KeyContext {
    pub fn new(secret: impl Into<Vec<u8>>, binding: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            binding: binding.into(),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Context bound to the current host name and user.
    pub fn for_this_host(secret: Option<&str>) -> Self {
        Self::new(secret.unwrap_or(FALLBACK_SECRET).as_bytes(), host_binding())
    }

    /// Override the PBKDF2 iteration count (at least 1).
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }
}

/// `hostname/user` for the running process.
pub fn host_binding() -> String {
    let host = std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "localhost".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{host}/{user}")
}

/// Whether `content` carries the protection marker.
pub fn is_protected(content: &[u8]) -> bool {
    content.starts_with(ENCRYPTED_MARKER.as_bytes())
}

/// Encrypts and decrypts secret files at rest.
#[derive(Clone)]
pub struct CredentialStore {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl CredentialStore {
    pub fn new(ctx: &KeyContext) -> Result<Self> {
        let mut key_bytes = [0u8; 32];
        let salt = format!("{SALT_PREFIX}{}", ctx.binding);
        let iterations = NonZeroU32::new(ctx.iterations).unwrap_or(NonZeroU32::MIN);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt.as_bytes(),
            &ctx.secret,
            &mut key_bytes,
        );
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| DriveUpError::Config("failed to initialise credential key".into()))?;
        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Read `path`, returning the plaintext.
    ///
    /// Plaintext files are rewritten in protected form before their original
    /// bytes are returned. Protected files are decrypted and never rewritten.
    pub async fn reveal(&self, path: &Path) -> Result<Vec<u8>> {
        let content = read_secret(path).await?;

        if !is_protected(&content) {
            let sealed = self.seal(&content)?;
            write_secret(path, &sealed).await?;
            tracing::info!(path = %path.display(), "Protected plaintext secret file");
            return Ok(content);
        }

        let encoded = content[ENCRYPTED_MARKER.len()..].trim_ascii();
        let payload = BASE64.decode(encoded).map_err(|e| {
            DriveUpError::credential(path, CredentialFault::Malformed, format!("bad base64: {e}"))
        })?;
        self.open(&payload).map_err(|fault| {
            let message = match fault {
                CredentialFault::Malformed => "payload too short",
                _ => "wrong host, user or secret, or corrupt ciphertext",
            };
            DriveUpError::credential(path, fault, message)
        })
    }

    /// Encrypt the current contents of `path` in place.
    ///
    /// Runs unconditionally: an already protected file gets wrapped a second
    /// time. Check [`is_protected`] first.
    pub async fn protect(&self, path: &Path) -> Result<()> {
        let content = read_secret(path).await?;
        let sealed = self.seal(&content)?;
        write_secret(path, &sealed).await
    }

    /// Encrypt `plaintext` and write it to `path`, creating parent directories.
    pub async fn write_protected(&self, path: &Path, plaintext: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DriveUpError::credential(path, CredentialFault::Io, e.to_string())
            })?;
        }
        let sealed = self.seal(plaintext)?;
        write_secret(path, &sealed).await
    }

    /// Marker plus base64 of the encrypted payload.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| DriveUpError::Config("system random source unavailable".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| DriveUpError::Config("encryption failed".into()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + in_out.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&in_out);

        let mut out = ENCRYPTED_MARKER.as_bytes().to_vec();
        out.extend_from_slice(BASE64.encode(&payload).as_bytes());
        Ok(out)
    }

    fn open(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, CredentialFault> {
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(CredentialFault::Malformed);
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CredentialFault::Malformed)?;
        let mut in_out = ciphertext.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CredentialFault::Decrypt)?;
        Ok(plain.to_vec())
    }
}

async fn read_secret(path: &Path) -> Result<Vec<u8>> {
    let content = tokio::fs::read(path).await.map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            CredentialFault::NotFound
        } else {
            CredentialFault::Io
        };
        DriveUpError::credential(path, kind, e.to_string())
    })?;
    if content.is_empty() {
        return Err(DriveUpError::credential(
            path,
            CredentialFault::Empty,
            "file has no content",
        ));
    }
    Ok(content)
}

/// Write through a sibling temp file and rename, so a crash never leaves a
/// half-written secret behind.
async fn write_secret(path: &Path, data: &[u8]) -> Result<()> {
    let io_err = |e: std::io::Error| DriveUpError::credential(path, CredentialFault::Io, e.to_string());

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, data).await.map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(binding: &str) -> CredentialStore {
        let ctx = KeyContext::new("test-secret", binding).with_iterations(1_000);
        CredentialStore::new(&ctx).unwrap()
    }

    #[tokio::test]
    async fn test_reveal_migrates_plaintext_and_returns_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google_credentials.json");
        let original = br#"{"installed":{"client_id":"abc"}}"#;
        tokio::fs::write(&path, original).await.unwrap();

        let s = store("host-a/alice");
        let revealed = s.reveal(&path).await.unwrap();
        assert_eq!(revealed, original);

        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert!(is_protected(&on_disk));
        assert!(!on_disk.windows(original.len()).any(|w| w == original));
    }

    #[tokio::test]
    async fn test_round_trip_through_protect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        let original: Vec<u8> = (0u8..=255).collect();
        tokio::fs::write(&path, &original).await.unwrap();

        let s = store("host-a/alice");
        // reveal(protect(reveal(plaintextPath)))
        let first = s.reveal(&path).await.unwrap();
        tokio::fs::write(&path, &first).await.unwrap();
        s.protect(&path).await.unwrap();
        let again = s.reveal(&path).await.unwrap();
        assert_eq!(again, original);
    }

    #[tokio::test]
    async fn test_protected_file_is_never_rewrapped_by_reveal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let s = store("host-a/alice");
        s.write_protected(&path, b"{\"access_token\":\"x\"}").await.unwrap();

        let before = tokio::fs::read(&path).await.unwrap();
        let plain = s.reveal(&path).await.unwrap();
        let after = tokio::fs::read(&path).await.unwrap();
        assert_eq!(plain, b"{\"access_token\":\"x\"}");
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_protect_twice_double_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        tokio::fs::write(&path, b"plain").await.unwrap();

        let s = store("host-a/alice");
        s.protect(&path).await.unwrap();
        s.protect(&path).await.unwrap();
        let once = s.reveal(&path).await.unwrap();
        assert!(is_protected(&once));
    }

    #[tokio::test]
    async fn test_other_host_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        store("host-a/alice").write_protected(&path, b"secret").await.unwrap();

        let err = store("host-b/alice").reveal(&path).await.unwrap_err();
        assert_eq!(err.credential_fault(), Some(CredentialFault::Decrypt));
    }

    #[tokio::test]
    async fn test_distinct_fault_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let s = store("host-a/alice");

        let missing = dir.path().join("missing.json");
        let err = s.reveal(&missing).await.unwrap_err();
        assert_eq!(err.credential_fault(), Some(CredentialFault::NotFound));

        let empty = dir.path().join("empty.json");
        tokio::fs::write(&empty, b"").await.unwrap();
        let err = s.reveal(&empty).await.unwrap_err();
        assert_eq!(err.credential_fault(), Some(CredentialFault::Empty));

        let bad_b64 = dir.path().join("bad.json");
        tokio::fs::write(&bad_b64, format!("{ENCRYPTED_MARKER}!!not base64!!"))
            .await
            .unwrap();
        let err = s.reveal(&bad_b64).await.unwrap_err();
        assert_eq!(err.credential_fault(), Some(CredentialFault::Malformed));

        let short = dir.path().join("short.json");
        tokio::fs::write(&short, format!("{ENCRYPTED_MARKER}{}", BASE64.encode([1u8; 8])))
            .await
            .unwrap();
        let err = s.reveal(&short).await.unwrap_err();
        assert_eq!(err.credential_fault(), Some(CredentialFault::Malformed));
    }

    #[tokio::test]
    async fn test_trailing_newline_after_payload_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let s = store("host-a/alice");
        s.write_protected(&path, b"value").await.unwrap();

        let mut content = tokio::fs::read(&path).await.unwrap();
        content.push(b'\n');
        tokio::fs::write(&path, content).await.unwrap();

        assert_eq!(s.reveal(&path).await.unwrap(), b"value");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_protected_file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token.json");
        store("h/u").write_protected(&path, b"x").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_host_binding_has_user_component() {
        assert!(host_binding().contains('/'));
    }
}
