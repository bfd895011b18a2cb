//! In-process store backends.
//!
//! Used by tests and by single-node deployments that don't need
//! durability. All three keep their state behind a tokio `RwLock`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{sort_recent_first, AccountDirectory, DocumentStore, StoreError, VersionStore};
use crate::model::{Document, DocumentId, NewSnapshot, Snapshot, SnapshotId};

#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<DocumentId, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.read().await.get(&id).cloned())
    }

    async fn save(&self, doc: &Document) -> Result<(), StoreError> {
        self.docs.write().await.insert(doc.id, doc.clone());
        Ok(())
    }

    async fn delete(&self, id: DocumentId) -> Result<bool, StoreError> {
        Ok(self.docs.write().await.remove(&id).is_some())
    }

    async fn list_owned_by(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        let mut owned: Vec<Document> = self
            .docs
            .read()
            .await
            .values()
            .filter(|d| d.is_owner(username))
            .cloned()
            .collect();
        sort_recent_first(&mut owned);
        Ok(owned)
    }

    async fn list_visible_to(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        let mut visible: Vec<Document> = self
            .docs
            .read()
            .await
            .values()
            .filter(|d| d.is_participant(username))
            .cloned()
            .collect();
        sort_recent_first(&mut visible);
        Ok(visible)
    }
}

/// Version store with store-assigned, strictly increasing ids.
pub struct MemoryVersionStore {
    snapshots: RwLock<BTreeMap<SnapshotId, Snapshot>>,
    next_id: AtomicU64,
}

impl Default for MemoryVersionStore {
    fn default() -> Self {
        Self {
            snapshots: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn create(&self, req: NewSnapshot) -> Result<Snapshot, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = Snapshot {
            id,
            document_id: req.document_id,
            author: req.author,
            content: req.content,
            created_at: Utc::now(),
        };
        self.snapshots.write().await.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    async fn list_by_document(&self, document_id: DocumentId) -> Result<Vec<Snapshot>, StoreError> {
        // Ids increase with creation time, so reverse id order is newest first.
        Ok(self
            .snapshots
            .read()
            .await
            .values()
            .rev()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(&id).cloned())
    }

    async fn delete_all_for_document(&self, document_id: DocumentId) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .retain(|_, s| s.document_id != document_id);
        Ok(())
    }
}

/// Account directory seeded with a fixed set of usernames.
#[derive(Default)]
pub struct MemoryAccountDirectory {
    accounts: RwLock<HashSet<String>>,
}

impl MemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn register(&self, username: impl Into<String>) {
        self.accounts.write().await.insert(username.into());
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccountDirectory {
    async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.accounts.read().await.contains(username))
    }

    async fn delete_account(&self, username: &str) -> Result<(), StoreError> {
        self.accounts.write().await.remove(username);
        Ok(())
    }
}
