//! Store contracts consumed by the collaboration core, and their backends.
//!
//! ```text
//! ┌─────────────┐          ┌────────────────────┐
//! │ EditRouter  │ ───────► │ DocumentStore      │  memory | RocksDB
//! │ DocService  │          └────────────────────┘
//! │ Coordinator │          ┌────────────────────┐
//! │             │ ───────► │ VersionStore       │  memory | remote (HTTP)
//! │             │          └────────────────────┘
//! │             │          ┌────────────────────┐
//! │             │ ───────► │ AccountDirectory   │  memory | remote (HTTP)
//! └─────────────┘          └────────────────────┘
//! ```
//!
//! The document store is the system of record for content; the version
//! store and account directory are separate services whose failures the
//! core classifies as dependency outages.

pub mod memory;
pub mod rocks;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Document, DocumentId, NewSnapshot, Snapshot, SnapshotId};

pub use memory::{MemoryAccountDirectory, MemoryDocumentStore, MemoryVersionStore};
pub use rocks::{RocksDocumentStore, StoreConfig};

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// RocksDB internal error
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    /// Remote service answered with a failure or could not be reached.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },
    #[error("{service} timed out")]
    Timeout { service: &'static str },
}

impl StoreError {
    /// Whether this failure came from a remote dependency rather than a
    /// local fault.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Document metadata and content persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Insert or replace the whole record.
    async fn save(&self, doc: &Document) -> Result<(), StoreError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete(&self, id: DocumentId) -> Result<bool, StoreError>;

    async fn list_owned_by(&self, username: &str) -> Result<Vec<Document>, StoreError>;

    /// Owned ∪ shared, most recently updated first.
    async fn list_visible_to(&self, username: &str) -> Result<Vec<Document>, StoreError>;
}

/// Version history contract.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn create(&self, snapshot: NewSnapshot) -> Result<Snapshot, StoreError>;

    /// Newest first.
    async fn list_by_document(&self, document_id: DocumentId) -> Result<Vec<Snapshot>, StoreError>;

    async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError>;

    async fn delete_all_for_document(&self, document_id: DocumentId) -> Result<(), StoreError>;
}

/// Identity service: existence checks and account removal.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn exists(&self, username: &str) -> Result<bool, StoreError>;

    async fn delete_account(&self, username: &str) -> Result<(), StoreError>;
}

/// Sort most recently updated first, ties broken by id for stable output.
pub(crate) fn sort_recent_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_classification() {
        assert!(StoreError::Timeout { service: "identity service" }.is_dependency_failure());
        assert!(StoreError::Unavailable {
            service: "version store",
            reason: "connection refused".into(),
        }
        .is_dependency_failure());
        assert!(!StoreError::Database("corrupt".into()).is_dependency_failure());
        assert!(!StoreError::Compression("bad frame".into()).is_dependency_failure());
    }

    #[test]
    fn test_store_error_display() {
        let e = StoreError::Timeout { service: "version store" };
        assert_eq!(e.to_string(), "version store timed out");
        let e = StoreError::Database("disk full".into());
        assert!(e.to_string().contains("disk full"));
    }
}
