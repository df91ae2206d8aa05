use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::utils::format_bytes;

/// Failure category of a protected secret file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    NotFound,
    Empty,
    Malformed,
    Decrypt,
    Io,
}

impl fmt::Display for CredentialFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialFault::NotFound => "not found",
            CredentialFault::Empty => "empty file",
            CredentialFault::Malformed => "malformed payload",
            CredentialFault::Decrypt => "decryption failed",
            CredentialFault::Io => "io failure",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum DriveUpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error ({kind}) for {}: {message}", path.display())]
    Credential {
        path: PathBuf,
        kind: CredentialFault,
        message: String,
    },

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Local file error for {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Not enough free space on account '{account}'{}. Required: {}, free: {} (total: {}, used: {})",
        file.as_deref().map(|f| format!(" for {f}")).unwrap_or_default(),
        format_bytes(*required),
        format_bytes(*free),
        format_bytes(*total),
        format_bytes(*used)
    )]
    InsufficientSpace {
        account: String,
        /// Set once the error reaches the upload that needed the space.
        file: Option<String>,
        required: u64,
        free: u64,
        total: u64,
        used: u64,
    },

    #[error("Remote {operation} failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Remote {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Upload of {file} failed: {source}")]
    Upload {
        file: String,
        #[source]
        source: Box<DriveUpError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, DriveUpError>;

impl DriveUpError {
    pub(crate) fn credential(
        path: impl Into<PathBuf>,
        kind: CredentialFault,
        message: impl Into<String>,
    ) -> Self {
        DriveUpError::Credential {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn remote(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        DriveUpError::Remote {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// True for a remote call answered with HTTP 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveUpError::Remote { status: Some(404), .. })
    }

    /// The credential fault kind, when this is a credential error.
    pub fn credential_fault(&self) -> Option<CredentialFault> {
        match self {
            DriveUpError::Credential { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Maps a `DriveUpError` to user-friendly CLI output with actionable suggestions.
pub fn handle_command_error(err: &DriveUpError) {
    use crate::output;

    match err {
        DriveUpError::Config(msg) => {
            output::error(&format!("Configuration error: {}", msg));
            output::info("Check config.yaml (or the files listed in DRIVEUP_CONFIG).");
        }
        DriveUpError::Credential { path, kind, .. } => {
            output::error(&format!("{}", err));
            match kind {
                CredentialFault::NotFound => output::info(&format!(
                    "Download the OAuth client JSON from the Google Cloud console and save it as {}.",
                    path.display()
                )),
                CredentialFault::Decrypt | CredentialFault::Malformed => output::info(
                    "The file was protected on another host or with another secret. Replace it with a fresh copy.",
                ),
                _ => {}
            }
        }
        DriveUpError::Authorization(_) => {
            output::error(&format!("{}", err));
            output::info("Run `driveup login` and finish the consent screen within the time limit.");
        }
        DriveUpError::InsufficientSpace { .. } => {
            output::error(&format!("{}", err));
            output::info("Free space on the account or lower upload_copies_count.");
        }
        DriveUpError::Upload { source, .. } if matches!(**source, DriveUpError::Http(_)) => {
            output::error(&format!("{}", err));
            output::info("Check your internet connection.");
        }
        DriveUpError::Http(e) => {
            output::error(&format!("Network error: {}", e));
            output::info("Check your internet connection.");
        }
        DriveUpError::Cancelled => {
            output::warning("Cancelled");
        }
        _ => {
            output::error(&format!("{}", err));
        }
    }
}
