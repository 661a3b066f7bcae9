//! Storage interfaces the pipeline consumes.
//!
//! The blob store, relational tables and review surface are external
//! collaborators; the pipeline only sees these traits. In-memory
//! reference implementations live in [`crate::memory`].

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{HashKind, HashRecord, MetaRecord, Submission, SubmissionStatus};

/// Opaque file storage. `save` is an idempotent overwrite.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Vec<u8>>;
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, name: &str) -> Result<bool>;
    /// All stored file names, for the media audit.
    async fn list(&self) -> Result<Vec<String>>;
    /// Move a stored file to a new name, for the rename repair.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

/// Fingerprint rows, keyed by the `(cave_id, hash, kind)` triple.
#[async_trait]
pub trait HashStore: Send + Sync {
    async fn all(&self) -> Result<Vec<HashRecord>>;
    async fn of_kind(&self, kind: HashKind) -> Result<Vec<HashRecord>>;
    async fn upsert(&self, records: &[HashRecord]) -> Result<()>;
    async fn remove_for(&self, cave_id: u32) -> Result<()>;
}

/// AI analysis rows, keyed by `cave_id`.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, cave_id: u32) -> Result<Option<MetaRecord>>;
    async fn of_kind(&self, kind: &str) -> Result<Vec<MetaRecord>>;
    async fn all(&self) -> Result<Vec<MetaRecord>>;
    async fn upsert(&self, record: &MetaRecord) -> Result<()>;
    async fn remove(&self, cave_id: u32) -> Result<()>;
}

/// Submission rows, keyed by id with a status index.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get(&self, id: u32) -> Result<Option<Submission>>;
    async fn upsert(&self, submission: &Submission) -> Result<()>;
    async fn by_status(&self, status: SubmissionStatus) -> Result<Vec<Submission>>;
}

/// Manual-review surface; receives submissions that land in `pending`.
#[async_trait]
pub trait ReviewSink: Send + Sync {
    async fn dispatch(&self, submission: &Submission) -> Result<()>;
}

/// Process-wide reusable-id allocator.
///
/// Tombstoned ids are harvested by [`IdPool::sweep`] and handed out
/// again, smallest first, before the high-water counter advances.
/// Allocation is serialized so two submissions never share an id.
#[derive(Debug)]
pub struct IdPool {
    inner: Mutex<IdPoolInner>,
}

#[derive(Debug)]
struct IdPoolInner {
    recycled: BTreeSet<u32>,
    next: u32,
}

impl IdPool {
    pub fn new(next: u32) -> Self {
        Self {
            inner: Mutex::new(IdPoolInner {
                recycled: BTreeSet::new(),
                next: next.max(1),
            }),
        }
    }

    pub fn allocate(&self) -> u32 {
        let mut inner = self.inner.lock().expect("id pool poisoned");
        if let Some(id) = inner.recycled.pop_first() {
            return id;
        }
        let id = inner.next;
        inner.next += 1;
        id
    }

    pub fn recycle(&self, id: u32) {
        let mut inner = self.inner.lock().expect("id pool poisoned");
        if id > 0 && id < inner.next {
            inner.recycled.insert(id);
        }
    }

    /// Harvest every tombstoned submission id into the pool.
    pub async fn sweep(&self, submissions: &dyn SubmissionStore) -> Result<usize> {
        let dead = submissions.by_status(SubmissionStatus::Delete).await?;
        let mut inner = self.inner.lock().expect("id pool poisoned");
        let mut harvested = 0;
        for submission in dead {
            if submission.id > 0
                && submission.id < inner.next
                && inner.recycled.insert(submission.id)
            {
                harvested += 1;
            }
        }
        Ok(harvested)
    }
}
