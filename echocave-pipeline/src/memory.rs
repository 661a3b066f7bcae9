//! In-memory reference implementations of the storage interfaces.
//!
//! Used by the test suite and by deployments that keep everything in
//! process; production glue plugs real blob/database adapters into the
//! same traits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CaveError, Result};
use crate::model::{HashKind, HashRecord, MetaRecord, Submission, SubmissionStatus};
use crate::store::{BlobStore, HashStore, MetaStore, ReviewSink, SubmissionStore};

/// Blob store backed by a map of file name to bytes.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().expect("blob store poisoned");
        files
            .get(name)
            .cloned()
            .ok_or_else(|| CaveError::blob(name, "not found"))
    }

    async fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().expect("blob store poisoned");
        files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let files = self.files.lock().expect("blob store poisoned");
        Ok(files.contains_key(name))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let files = self.files.lock().expect("blob store poisoned");
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files.lock().expect("blob store poisoned");
        let bytes = files
            .remove(from)
            .ok_or_else(|| CaveError::blob(from, "not found"))?;
        files.insert(to.to_string(), bytes);
        Ok(())
    }
}

/// Hash rows keyed by the full `(cave_id, hash, kind)` triple.
#[derive(Debug, Default)]
pub struct MemoryHashStore {
    records: Mutex<Vec<HashRecord>>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn all(&self) -> Result<Vec<HashRecord>> {
        Ok(self.records.lock().expect("hash store poisoned").clone())
    }

    async fn of_kind(&self, kind: HashKind) -> Result<Vec<HashRecord>> {
        let records = self.records.lock().expect("hash store poisoned");
        Ok(records.iter().filter(|r| r.kind == kind).cloned().collect())
    }

    async fn upsert(&self, incoming: &[HashRecord]) -> Result<()> {
        let mut records = self.records.lock().expect("hash store poisoned");
        for record in incoming {
            if !records.contains(record) {
                records.push(record.clone());
            }
        }
        Ok(())
    }

    async fn remove_for(&self, cave_id: u32) -> Result<()> {
        let mut records = self.records.lock().expect("hash store poisoned");
        records.retain(|r| r.cave_id != cave_id);
        Ok(())
    }
}

/// Meta rows keyed by `cave_id`.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    records: Mutex<HashMap<u32, MetaRecord>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, cave_id: u32) -> Result<Option<MetaRecord>> {
        let records = self.records.lock().expect("meta store poisoned");
        Ok(records.get(&cave_id).cloned())
    }

    async fn of_kind(&self, kind: &str) -> Result<Vec<MetaRecord>> {
        let records = self.records.lock().expect("meta store poisoned");
        let mut out: Vec<MetaRecord> =
            records.values().filter(|m| m.kind == kind).cloned().collect();
        out.sort_by_key(|m| m.cave_id);
        Ok(out)
    }

    async fn all(&self) -> Result<Vec<MetaRecord>> {
        let records = self.records.lock().expect("meta store poisoned");
        let mut out: Vec<MetaRecord> = records.values().cloned().collect();
        out.sort_by_key(|m| m.cave_id);
        Ok(out)
    }

    async fn upsert(&self, record: &MetaRecord) -> Result<()> {
        let mut records = self.records.lock().expect("meta store poisoned");
        records.insert(record.cave_id, record.clone());
        Ok(())
    }

    async fn remove(&self, cave_id: u32) -> Result<()> {
        let mut records = self.records.lock().expect("meta store poisoned");
        records.remove(&cave_id);
        Ok(())
    }
}

/// Submission rows keyed by id.
#[derive(Debug, Default)]
pub struct MemorySubmissionStore {
    rows: Mutex<HashMap<u32, Submission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn get(&self, id: u32) -> Result<Option<Submission>> {
        let rows = self.rows.lock().expect("submission store poisoned");
        Ok(rows.get(&id).cloned())
    }

    async fn upsert(&self, submission: &Submission) -> Result<()> {
        let mut rows = self.rows.lock().expect("submission store poisoned");
        rows.insert(submission.id, submission.clone());
        Ok(())
    }

    async fn by_status(&self, status: SubmissionStatus) -> Result<Vec<Submission>> {
        let rows = self.rows.lock().expect("submission store poisoned");
        let mut out: Vec<Submission> =
            rows.values().filter(|s| s.status == status).cloned().collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }
}

/// Review sink that records dispatched submission ids.
#[derive(Debug, Default)]
pub struct MemoryReviewSink {
    dispatched: Mutex<Vec<u32>>,
}

impl MemoryReviewSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<u32> {
        self.dispatched.lock().expect("review sink poisoned").clone()
    }
}

#[async_trait]
impl ReviewSink for MemoryReviewSink {
    async fn dispatch(&self, submission: &Submission) -> Result<()> {
        let mut dispatched = self.dispatched.lock().expect("review sink poisoned");
        dispatched.push(submission.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_store_round_trips() {
        let store = MemoryBlobStore::new();
        store.save("a.png", b"bytes").await.unwrap();
        assert_eq!(store.read("a.png").await.unwrap(), b"bytes");
        assert!(store.exists("a.png").await.unwrap());
        assert!(!store.exists("b.png").await.unwrap());
        assert!(store.read("b.png").await.is_err());
    }

    #[tokio::test]
    async fn blob_store_renames_and_drops_the_old_name() {
        let store = MemoryBlobStore::new();
        store.save("old.png", b"bytes").await.unwrap();
        store.rename("old.png", "new.png").await.unwrap();
        assert!(!store.exists("old.png").await.unwrap());
        assert_eq!(store.read("new.png").await.unwrap(), b"bytes");
        assert!(store.rename("gone.png", "x.png").await.is_err());
    }

    #[tokio::test]
    async fn hash_store_deduplicates_the_triple() {
        let store = MemoryHashStore::new();
        let record = HashRecord {
            cave_id: 1,
            hash: "00ff00ff00ff00ff".into(),
            kind: HashKind::Image,
        };
        store.upsert(&[record.clone(), record.clone()]).await.unwrap();
        store.upsert(&[record]).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hash_store_filters_by_kind_and_removes_by_id() {
        let store = MemoryHashStore::new();
        store
            .upsert(&[
                HashRecord { cave_id: 1, hash: "a".repeat(16), kind: HashKind::Text },
                HashRecord { cave_id: 1, hash: "b".repeat(16), kind: HashKind::Image },
                HashRecord { cave_id: 2, hash: "c".repeat(16), kind: HashKind::Image },
            ])
            .await
            .unwrap();
        assert_eq!(store.of_kind(HashKind::Image).await.unwrap().len(), 2);
        store.remove_for(1).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
