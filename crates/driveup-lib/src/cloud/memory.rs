//! In-process [`StorageBackend`] for tests.
//!
//! Files live in a `Vec` with timestamps from a logical clock that advances
//! one second per mutation, so ordering is deterministic. Quota counts every
//! stored byte, trash included. Call counters and failure switches let tests
//! assert exactly which remote operations ran.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;

use crate::cloud::{
    FileFilter, FileOrder, NewFile, QuotaReport, RemoteFileRecord, StorageBackend, UploadBody,
};
use crate::errors::{DriveUpError, Result};

const CLOCK_ORIGIN: i64 = 1_700_000_000;

/// A stored file, live or trashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub trashed: Option<DateTime<Utc>>,
}

/// Number of calls made per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub list: usize,
    pub delete: usize,
    pub quota: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.create + self.list + self.delete + self.quota
    }
}

#[derive(Default)]
struct State {
    files: Vec<StoredFile>,
    clock: i64,
    next_id: u64,
    calls: CallCounts,
    failing_deletes: HashSet<String>,
    fail_list: bool,
    fail_create: bool,
}

impl State {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(CLOCK_ORIGIN + self.clock, 0).unwrap_or_default()
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }
}

pub struct MemoryBackend {
    total: u64,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// A backend with `total` bytes of capacity.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            state: Mutex::new(State::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the rest of the test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a live file; returns its id.
    pub fn insert_file(&self, name: &str, parent: Option<&str>, size: u64) -> String {
        let mut st = self.state();
        let id = st.next_id();
        let modified = st.tick();
        st.files.push(StoredFile {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            size,
            modified,
            trashed: None,
        });
        id
    }

    /// Seed a trashed file; trash time follows insertion order.
    pub fn insert_trashed(&self, name: &str, size: u64) -> String {
        let mut st = self.state();
        let id = st.next_id();
        let modified = st.tick();
        let trashed = st.tick();
        st.files.push(StoredFile {
            id: id.clone(),
            name: name.to_string(),
            parent: None,
            size,
            modified,
            trashed: Some(trashed),
        });
        id
    }

    pub fn files(&self) -> Vec<StoredFile> {
        self.state().files.clone()
    }

    /// Live files named `name` under `parent`.
    pub fn live_named(&self, name: &str, parent: Option<&str>) -> Vec<StoredFile> {
        self.state()
            .files
            .iter()
            .filter(|f| f.trashed.is_none() && f.name == name && f.parent.as_deref() == parent)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Make every delete of `id` fail.
    pub fn fail_delete_of(&self, id: &str) {
        self.state().failing_deletes.insert(id.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_list = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_file(&self, file: &NewFile, mut body: UploadBody) -> Result<String> {
        {
            let mut st = self.state();
            st.calls.create += 1;
            if st.fail_create {
                return Err(DriveUpError::remote("create", Some(500), "injected failure"));
            }
        }

        let mut content = Vec::new();
        body.read_to_end(&mut content).await?;

        let mut st = self.state();
        let id = st.next_id();
        let modified = st.tick();
        st.files.push(StoredFile {
            id: id.clone(),
            name: file.name.clone(),
            parent: file.parent.clone(),
            size: content.len() as u64,
            modified,
            trashed: None,
        });
        Ok(id)
    }

    async fn list_files(
        &self,
        filter: &FileFilter,
        order: FileOrder,
    ) -> Result<Vec<RemoteFileRecord>> {
        let mut st = self.state();
        st.calls.list += 1;
        if st.fail_list {
            return Err(DriveUpError::remote("list", Some(500), "injected failure"));
        }

        let mut matched: Vec<&StoredFile> = st
            .files
            .iter()
            .filter(|f| match filter {
                FileFilter::NamedIn { name, parent } => {
                    f.trashed.is_none() && &f.name == name && &f.parent == parent
                }
                FileFilter::Trashed => f.trashed.is_some(),
            })
            .collect();
        match order {
            FileOrder::OldestModified => matched.sort_by_key(|f| f.modified),
            // Newest first, so callers cannot rely on insertion order.
            FileOrder::Unordered => matched.reverse(),
        }

        Ok(matched
            .into_iter()
            .map(|f| RemoteFileRecord {
                id: f.id.clone(),
                name: f.name.clone(),
                modified_time: Some(f.modified),
                size: f.size,
                trashed_time: f.trashed,
            })
            .collect())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let mut st = self.state();
        st.calls.delete += 1;
        if st.failing_deletes.contains(id) {
            return Err(DriveUpError::remote("delete", Some(403), "injected failure"));
        }
        let before = st.files.len();
        st.files.retain(|f| f.id != id);
        if st.files.len() == before {
            return Err(DriveUpError::remote("delete", Some(404), format!("File not found: {id}")));
        }
        Ok(())
    }

    async fn get_quota(&self) -> Result<QuotaReport> {
        let mut st = self.state();
        st.calls.quota += 1;
        let used = st.files.iter().map(|f| f.size).sum();
        let used_in_trash = st
            .files
            .iter()
            .filter(|f| f.trashed.is_some())
            .map(|f| f.size)
            .sum();
        Ok(QuotaReport {
            total: self.total,
            used,
            used_in_trash,
        })
    }

    fn location_url(&self, folder: Option<&str>) -> String {
        match folder {
            Some(id) => format!("memory://folders/{id}"),
            None => "memory://root".to_string(),
        }
    }
}
