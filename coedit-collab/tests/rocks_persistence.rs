//! Persistence tests for the RocksDB document store.
//!
//! Each test opens a store in a temporary directory, writes through the
//! service layer or the store directly, then reopens the database to check
//! what survived.

use std::sync::Arc;
use std::time::Duration;

use coedit_collab::{
    Actor, CreateDocument, DocService, Document, DocumentStore, MemoryAccountDirectory,
    MemoryVersionStore, RocksDocumentStore, StoreConfig, Stores,
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> RocksDocumentStore {
    RocksDocumentStore::open(StoreConfig::for_testing(dir.path())).unwrap()
}

#[tokio::test]
async fn test_document_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut doc = Document::new("Spec", Some("draft ".repeat(500)), "alice");
    doc.add_collaborator("bob");

    {
        let store = open(&dir);
        store.save(&doc).await.unwrap();
        store.sync().unwrap();
    }

    let store = open(&dir);
    let loaded = store.get(doc.id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "Spec");
    assert_eq!(loaded.content, doc.content);
    assert_eq!(loaded.owner, "alice");
    assert!(loaded.is_collaborator("bob"));
    assert_eq!(loaded.created_at.timestamp_micros(), doc.created_at.timestamp_micros());
}

#[tokio::test]
async fn test_visibility_index_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut shared = Document::new("Shared", None, "alice");
    shared.add_collaborator("bob");
    let private = Document::new("Private", None, "alice");
    let foreign = Document::new("Foreign", None, "carol");

    {
        let store = open(&dir);
        for doc in [&shared, &private, &foreign] {
            store.save(doc).await.unwrap();
        }
    }

    let store = open(&dir);
    assert_eq!(store.list_owned_by("alice").await.unwrap().len(), 2);
    let bob_sees = store.list_visible_to("bob").await.unwrap();
    assert_eq!(bob_sees.len(), 1);
    assert_eq!(bob_sees[0].id, shared.id);
    assert!(store.list_visible_to("dave").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revoked_member_index_is_removed() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let mut doc = Document::new("Spec", None, "alice");
    doc.add_collaborator("bob");
    store.save(&doc).await.unwrap();

    doc.remove_collaborator("bob");
    store.save(&doc).await.unwrap();
    drop(store);

    let store = open(&dir);
    assert!(store.list_visible_to("bob").await.unwrap().is_empty());
    assert_eq!(store.list_visible_to("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_service_over_rocksdb() {
    let dir = TempDir::new().unwrap();
    let alice = Actor::trusted("alice");
    let id = {
        let service = DocService::new(
            Stores {
                documents: Arc::new(open(&dir)),
                versions: Arc::new(MemoryVersionStore::new()),
                accounts: Arc::new(MemoryAccountDirectory::with_accounts(["alice", "bob"])),
            },
            Duration::from_secs(1),
        );
        let doc = service
            .create(
                &alice,
                CreateDocument {
                    title: "Spec".into(),
                    content: Some("draft".into()),
                },
            )
            .await
            .unwrap();
        service.share(doc.id, &alice, "bob").await.unwrap();
        doc.id
    };

    let store = open(&dir);
    let loaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.content, "draft");
    assert!(loaded.is_collaborator("bob"));

    assert!(store.delete(id).await.unwrap());
    assert!(!store.delete(id).await.unwrap());
    assert!(store.list_visible_to("bob").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_writers_share_the_store() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut doc = Document::new(format!("Doc {i}"), Some("x".repeat(2048)), "alice");
            doc.add_collaborator("bob");
            store.save(&doc).await.unwrap();
            doc.id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    assert_eq!(store.list_visible_to("bob").await.unwrap().len(), 32);
    for id in ids {
        assert!(store.get(id).await.unwrap().is_some());
    }
}
