//! Remote storage capability.
//!
//! [`StorageBackend`] is the seam between the quota/upload logic and the
//! provider. `gdrive` talks to Google Drive v3; `memory` is an in-process
//! double used by tests.

pub mod gdrive;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::errors::Result;

/// Streamed file content handed to [`StorageBackend::create_file`].
pub type UploadBody = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Metadata for a file about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub name: String,
    /// Destination folder id; `None` is the account root.
    pub parent: Option<String>,
    pub size: u64,
}

/// Which remote files a listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    /// Non-trashed files with exactly `name` directly under `parent` (or the root).
    NamedIn { name: String, parent: Option<String> },
    /// Trashed items owned by the account.
    Trashed,
}

/// Requested ordering of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOrder {
    /// Oldest modification time first.
    OldestModified,
    /// Whatever order the provider returns.
    Unordered,
}

/// One remote file as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileRecord {
    pub id: String,
    pub name: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub size: u64,
    pub trashed_time: Option<DateTime<Utc>>,
}

/// Raw storage quota; `total` is `u64::MAX` for unlimited accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReport {
    pub total: u64,
    pub used: u64,
    pub used_in_trash: u64,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Provider name for log fields.
    fn name(&self) -> &str;

    /// Create `file` with `body` as content, returning the new file id.
    async fn create_file(&self, file: &NewFile, body: UploadBody) -> Result<String>;

    /// List files matching `filter`. A "not found" answer is an empty list.
    async fn list_files(
        &self,
        filter: &FileFilter,
        order: FileOrder,
    ) -> Result<Vec<RemoteFileRecord>>;

    /// Permanently delete a file, bypassing the trash.
    async fn delete_file(&self, id: &str) -> Result<()>;

    async fn get_quota(&self) -> Result<QuotaReport>;

    /// Browser URL for `folder`, or for the root when `None`.
    fn location_url(&self, folder: Option<&str>) -> String;
}
