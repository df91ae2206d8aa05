//! Upload orchestration: resolve account, prune, assure space, stream.

pub mod progress;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::accounts::AccountRegistry;
use crate::cloud::NewFile;
use crate::errors::{DriveUpError, Result};
use crate::signal::cancellable;
use crate::space;
use crate::utils::format_bytes;
use progress::{ProgressReader, ProgressReporter};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// One file to upload; `account_id` of `None` selects the default account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub local_path: PathBuf,
    pub account_id: Option<String>,
}

impl UploadTask {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            account_id: None,
        }
    }

    pub fn to_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub account_id: String,
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub location_url: String,
}

fn local_io(path: &Path, source: std::io::Error) -> DriveUpError {
    DriveUpError::LocalIo {
        path: path.to_path_buf(),
        source,
    }
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            local_io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })
}

/// Runs uploads against the accounts of a registry.
pub struct Uploader<'r> {
    registry: &'r AccountRegistry,
    progress_interval: Duration,
}

impl<'r> Uploader<'r> {
    pub fn new(registry: &'r AccountRegistry) -> Self {
        Self {
            registry,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, every: Duration) -> Self {
        self.progress_interval = every;
        self
    }

    /// Upload `task.local_path`, keeping the account's retention and space rules.
    pub async fn upload(&self, task: &UploadTask, cancel: &CancellationToken) -> Result<UploadResult> {
        let account = self.registry.resolve(task.account_id.as_deref())?;
        let path = task.local_path.as_path();
        let name = base_name(path)?;

        // The handle stays open across the remote steps and closes on drop.
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| local_io(path, e))?;
        let metadata = file.metadata().await.map_err(|e| local_io(path, e))?;
        if metadata.is_dir() {
            return Err(local_io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is a directory"),
            ));
        }
        let size = metadata.len();
        tracing::info!(account = %account.id(), file = %name, size = %format_bytes(size), "Starting upload");

        match cancellable(cancel, space::prune_old_copies(account, &name)).await {
            Ok(report) => {
                tracing::debug!(account = %account.id(), file = %name, ?report, "Retention applied")
            }
            Err(DriveUpError::Cancelled) => return Err(DriveUpError::Cancelled),
            Err(e) => {
                tracing::warn!(account = %account.id(), file = %name, error = %e, "Failed to prune old copies")
            }
        }

        cancellable(cancel, space::ensure_space(account, size))
            .await
            .map_err(|e| match e {
                DriveUpError::InsufficientSpace {
                    account: id,
                    required,
                    free,
                    total,
                    used,
                    ..
                } => DriveUpError::InsufficientSpace {
                    account: id,
                    file: Some(name.clone()),
                    required,
                    free,
                    total,
                    used,
                },
                other => other,
            })?;

        let reader = ProgressReader::new(file);
        let reporter =
            ProgressReporter::spawn(name.clone(), size, reader.counter(), self.progress_interval);

        let new_file = NewFile {
            name: name.clone(),
            parent: account.folder().map(str::to_string),
            size,
        };
        let created = cancellable(
            cancel,
            account.backend().create_file(&new_file, Box::pin(reader)),
        )
        .await;
        reporter.finish().await;

        let file_id = created.map_err(|e| match e {
            DriveUpError::Cancelled => DriveUpError::Cancelled,
            other => DriveUpError::Upload {
                file: name.clone(),
                source: Box::new(other),
            },
        })?;

        let location_url = account.backend().location_url(account.folder());
        tracing::info!(account = %account.id(), file = %name, file_id = %file_id, location = %location_url, "Upload complete");

        Ok(UploadResult {
            account_id: account.id().to_string(),
            file_id,
            name,
            size,
            location_url,
        })
    }
}
