//! Per-document write serialization.
//!
//! Every read-modify-write of a stored document (live EDIT, metadata
//! update, share, revoke, delete) holds that document's guard from load to
//! save, so the later arrival wins and never clobbers fields written by a
//! concurrent mutation it did not observe. The edit router routes every
//! realtime message under the same guard and broadcasts before releasing
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::DocumentId;

#[derive(Default)]
pub struct DocumentLocks {
    locks: RwLock<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `doc_id`.
    pub async fn lock(&self, doc_id: DocumentId) -> OwnedMutexGuard<()> {
        let lock = {
            let locks = self.locks.read().await;
            locks.get(&doc_id).cloned()
        };
        let lock = match lock {
            Some(lock) => lock,
            None => self
                .locks
                .write()
                .await
                .entry(doc_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone(),
        };
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted document once nobody holds or awaits it.
    pub async fn release(&self, doc_id: DocumentId) {
        let mut locks = self.locks.write().await;
        if let Some(lock) = locks.get(&doc_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&doc_id);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}
