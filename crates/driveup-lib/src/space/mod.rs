//! Free-space checks, trash reclamation and retention pruning.
//!
//! Quota is queried live on every call. Deletions run one at a time; a
//! failed delete is logged and the sweep moves on to the next file.

use serde::Serialize;

use crate::accounts::AccountHandle;
use crate::cloud::{FileFilter, FileOrder, QuotaReport, RemoteFileRecord};
use crate::errors::{DriveUpError, Result};
use crate::utils::format_bytes;

/// Storage usage of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageQuota {
    /// `u64::MAX` when the account has no limit.
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_in_trash_bytes: u64,
}

impl StorageQuota {
    pub fn is_unlimited(&self) -> bool {
        self.total_bytes == u64::MAX
    }
}

impl From<QuotaReport> for StorageQuota {
    fn from(q: QuotaReport) -> Self {
        Self {
            total_bytes: q.total,
            used_bytes: q.used,
            free_bytes: q.total.saturating_sub(q.used),
            used_in_trash_bytes: q.used_in_trash,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub matched: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub deleted: usize,
    pub freed_bytes: u64,
}

pub async fn get_quota(account: &AccountHandle) -> Result<StorageQuota> {
    Ok(account.backend().get_quota().await?.into())
}

/// Whether `required` bytes fit, with the quota that decided it.
pub async fn has_enough_space(
    account: &AccountHandle,
    required: u64,
) -> Result<(bool, StorageQuota)> {
    let quota = get_quota(account).await?;
    Ok((quota.free_bytes >= required, quota))
}

/// Delete the oldest copies of `filename` so that at most
/// `upload_copies_count - 1` remain before a new upload.
pub async fn prune_old_copies(account: &AccountHandle, filename: &str) -> Result<PruneReport> {
    let keep = account.config().keep_before_upload();
    let filter = FileFilter::NamedIn {
        name: filename.to_string(),
        parent: account.folder().map(str::to_string),
    };
    let mut files = account
        .backend()
        .list_files(&filter, FileOrder::OldestModified)
        .await?;
    // Providers may return ties or ignore orderBy on some listings.
    files.sort_by_key(|f| f.modified_time);

    let mut report = PruneReport {
        matched: files.len(),
        ..Default::default()
    };
    if files.len() <= keep {
        return Ok(report);
    }

    let excess = files.len() - keep;
    for file in files.iter().take(excess) {
        match account.backend().delete_file(&file.id).await {
            Ok(()) => {
                report.deleted += 1;
                tracing::info!(account = %account.id(), file = %file.name, file_id = %file.id, "Deleted old copy");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(account = %account.id(), file_id = %file.id, error = %e, "Failed to delete old copy");
            }
        }
    }
    Ok(report)
}

fn trash_order(files: &mut [RemoteFileRecord]) {
    files.sort_by(|a, b| {
        a.trashed_time
            .cmp(&b.trashed_time)
            .then(a.modified_time.cmp(&b.modified_time))
    });
}

/// Permanently delete trashed items, oldest-trashed first, until at least
/// `target_bytes` have been freed or the trash is empty.
pub async fn reclaim_trash(account: &AccountHandle, target_bytes: u64) -> Result<ReclaimReport> {
    let mut trashed = account
        .backend()
        .list_files(&FileFilter::Trashed, FileOrder::Unordered)
        .await?;
    trash_order(&mut trashed);

    let mut report = ReclaimReport::default();
    for file in &trashed {
        if report.freed_bytes >= target_bytes {
            break;
        }
        match account.backend().delete_file(&file.id).await {
            Ok(()) => {
                report.deleted += 1;
                report.freed_bytes = report.freed_bytes.saturating_add(file.size);
                tracing::debug!(account = %account.id(), file_id = %file.id, size = file.size, "Purged trashed file");
            }
            Err(e) => {
                tracing::warn!(account = %account.id(), file_id = %file.id, error = %e, "Failed to purge trashed file");
            }
        }
    }

    tracing::info!(
        account = %account.id(),
        deleted = report.deleted,
        freed = %format_bytes(report.freed_bytes),
        "Trash reclaimed"
    );
    Ok(report)
}

/// Make sure `required` bytes are free, emptying trash if needed.
pub async fn ensure_space(account: &AccountHandle, required: u64) -> Result<StorageQuota> {
    let (enough, quota) = has_enough_space(account, required).await?;
    if enough {
        return Ok(quota);
    }

    tracing::info!(
        account = %account.id(),
        required = %format_bytes(required),
        free = %format_bytes(quota.free_bytes),
        trash = %format_bytes(quota.used_in_trash_bytes),
        "Not enough free space, reclaiming trash"
    );
    match reclaim_trash(account, required).await {
        Ok(_) => {}
        Err(DriveUpError::Cancelled) => return Err(DriveUpError::Cancelled),
        Err(e) => {
            tracing::warn!(account = %account.id(), error = %e, "Failed to reclaim trash");
        }
    }

    let (enough, quota) = has_enough_space(account, required).await?;
    if enough {
        return Ok(quota);
    }
    Err(DriveUpError::InsufficientSpace {
        account: account.id().to_string(),
        file: None,
        required,
        free: quota.free_bytes,
        total: quota.total_bytes,
        used: quota.used_bytes,
    })
}
