//! Cross-store consistency under failing dependencies.
//!
//! The version store and identity service are replaced by doubles that
//! fail, stall, or count calls, so the ordering and policy of each
//! destructive operation can be observed from outside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coedit_collab::{
    AccountDirectory, Actor, CollabError, CreateDocument, DocService, Document, DocumentId,
    DocumentLocks, DocumentStore, EditMessage, EditRouter, ErrorKind, MemoryAccountDirectory,
    MemoryDocumentStore, MemoryVersionStore, NewSnapshot, PresenceRegistry, Snapshot, SnapshotId,
    SnapshotPublisher, StoreError, Stores, TopicRegistry, VersionStore,
};
use uuid::Uuid;

const TIMEOUT: Duration = Duration::from_millis(200);

// ─── Doubles ────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Fault {
    Healthy,
    Fail,
    Stall,
}

/// Version store whose delete and create can be made to fail or hang.
struct FaultyVersions {
    inner: MemoryVersionStore,
    fault: Fault,
    creates: AtomicUsize,
}

impl FaultyVersions {
    fn new(fault: Fault) -> Self {
        Self {
            inner: MemoryVersionStore::new(),
            fault,
            creates: AtomicUsize::new(0),
        }
    }

    async fn inject(&self) -> Result<(), StoreError> {
        match self.fault {
            Fault::Healthy => Ok(()),
            Fault::Fail => Err(StoreError::Unavailable {
                service: "version store",
                reason: "503".into(),
            }),
            Fault::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl VersionStore for FaultyVersions {
    async fn create(&self, snapshot: NewSnapshot) -> Result<Snapshot, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inject().await?;
        self.inner.create(snapshot).await
    }

    async fn list_by_document(&self, document_id: DocumentId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.list_by_document(document_id).await
    }

    async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        self.inner.get(id).await
    }

    async fn delete_all_for_document(&self, document_id: DocumentId) -> Result<(), StoreError> {
        self.inject().await?;
        self.inner.delete_all_for_document(document_id).await
    }
}

/// Document store that counts every call and can fail deletes.
struct CountingDocuments {
    inner: MemoryDocumentStore,
    calls: AtomicUsize,
    saves: AtomicUsize,
    fail_deletes: bool,
}

impl CountingDocuments {
    fn new(fail_deletes: bool) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            calls: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            fail_deletes,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingDocuments {
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn save(&self, doc: &Document) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(doc).await
    }

    async fn delete(&self, id: DocumentId) -> Result<bool, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(StoreError::Database("disk full".into()));
        }
        self.inner.delete(id).await
    }

    async fn list_owned_by(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_owned_by(username).await
    }

    async fn list_visible_to(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_visible_to(username).await
    }
}

/// Identity service that counts lookups and removals.
struct CountingAccounts {
    inner: MemoryAccountDirectory,
    lookups: AtomicUsize,
    deletions: AtomicUsize,
    unreachable: bool,
}

impl CountingAccounts {
    fn new(unreachable: bool) -> Self {
        Self {
            inner: MemoryAccountDirectory::with_accounts(["alice", "bob", "carol"]),
            lookups: AtomicUsize::new(0),
            deletions: AtomicUsize::new(0),
            unreachable,
        }
    }
}

#[async_trait]
impl AccountDirectory for CountingAccounts {
    async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(StoreError::Unavailable {
                service: "identity service",
                reason: "connection refused".into(),
            });
        }
        self.inner.exists(username).await
    }

    async fn delete_account(&self, username: &str) -> Result<(), StoreError> {
        self.deletions.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_account(username).await
    }
}

struct Harness {
    service: DocService,
    documents: Arc<CountingDocuments>,
    versions: Arc<FaultyVersions>,
    accounts: Arc<CountingAccounts>,
}

fn harness(fault: Fault, fail_deletes: bool, identity_down: bool) -> Harness {
    let documents = Arc::new(CountingDocuments::new(fail_deletes));
    let versions = Arc::new(FaultyVersions::new(fault));
    let accounts = Arc::new(CountingAccounts::new(identity_down));
    let service = DocService::new(
        Stores {
            documents: documents.clone(),
            versions: versions.clone(),
            accounts: accounts.clone(),
        },
        TIMEOUT,
    );
    Harness {
        service,
        documents,
        versions,
        accounts,
    }
}

async fn create(h: &Harness, owner: &str, title: &str) -> Document {
    h.service
        .create(
            &Actor::trusted(owner),
            CreateDocument {
                title: title.into(),
                content: Some("draft".into()),
            },
        )
        .await
        .unwrap()
}

// ─── Document deletion ──────────────────────────────────────

#[tokio::test]
async fn test_delete_survives_failing_version_store() {
    let h = harness(Fault::Fail, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;

    h.service.delete(doc.id, &alice).await.unwrap();

    let err = h.service.get(doc.id, &alice).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_survives_stalled_version_store() {
    let h = harness(Fault::Stall, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;

    let started = tokio::time::Instant::now();
    h.service.delete(doc.id, &alice).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h.documents.inner.get(doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_by_collaborator_is_forbidden() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;
    h.service.share(doc.id, &alice, "bob").await.unwrap();

    let err = h.service.delete(doc.id, &Actor::trusted("bob")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(h.service.get(doc.id, &alice).await.is_ok());
}

// ─── Account deletion ───────────────────────────────────────

#[tokio::test]
async fn test_account_deletion_purges_then_removes_account() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    create(&h, "alice", "A").await;
    create(&h, "alice", "B").await;
    let foreign = create(&h, "bob", "C").await;

    let purged = h.service.delete_account(&alice).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(h.accounts.deletions.load(Ordering::SeqCst), 1);
    assert!(!h.accounts.inner.exists("alice").await.unwrap());
    assert!(h.service.get(foreign.id, &Actor::trusted("bob")).await.is_ok());
}

#[tokio::test]
async fn test_account_kept_when_purge_fails() {
    let h = harness(Fault::Healthy, true, false);
    let alice = Actor::trusted("alice");
    create(&h, "alice", "A").await;

    let err = h.service.delete_account(&alice).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(h.accounts.deletions.load(Ordering::SeqCst), 0);
    assert!(h.accounts.inner.exists("alice").await.unwrap());
}

#[tokio::test]
async fn test_account_purge_ignores_version_failures() {
    let h = harness(Fault::Fail, false, false);
    create(&h, "alice", "A").await;

    let purged = h.service.delete_account(&Actor::trusted("alice")).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(h.documents.inner.len().await, 0);
}

// ─── Sharing ────────────────────────────────────────────────

#[tokio::test]
async fn test_self_share_rejected_before_identity_lookup() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;

    let err = h.service.share(doc.id, &alice, "alice").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(h.accounts.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_share_with_identity_service_down() {
    let h = harness(Fault::Healthy, false, true);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;
    let saves_before = h.documents.saves();

    let err = h.service.share(doc.id, &alice, "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    assert!(matches!(err, CollabError::DependencyUnavailable { service: "identity service", .. }));
    assert_eq!(h.documents.saves(), saves_before);
}

#[tokio::test]
async fn test_repeated_share_writes_once() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;
    let saves_before = h.documents.saves();

    h.service.share(doc.id, &alice, "bob").await.unwrap();
    h.service.share(doc.id, &alice, "bob").await.unwrap();
    assert_eq!(h.documents.saves(), saves_before + 1);
}

#[tokio::test]
async fn test_revoke_non_member_writes_nothing() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;
    let saves_before = h.documents.saves();

    let err = h.service.revoke(doc.id, &alice, "carol").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.documents.saves(), saves_before);
}

// ─── Live edits ─────────────────────────────────────────────

fn router(h: &Harness) -> EditRouter {
    h.service.edit_router(Arc::new(PresenceRegistry::new()))
}

#[tokio::test]
async fn test_cursor_touches_no_store() {
    let h = harness(Fault::Healthy, false, false);
    let doc = create(&h, "alice", "Spec").await;
    let router = router(&h);
    let calls_before = h.documents.calls();
    let creates_before = h.versions.creates.load(Ordering::SeqCst);

    let out = router
        .route(doc.id, &Actor::trusted("alice"), EditMessage::cursor("alice", 7))
        .await
        .unwrap();
    assert_eq!(out, EditMessage::cursor("alice", 7));
    assert_eq!(h.documents.calls(), calls_before);
    assert_eq!(h.versions.creates.load(Ordering::SeqCst), creates_before);
}

#[tokio::test]
async fn test_edit_on_unknown_document_publishes_nothing() {
    let h = harness(Fault::Healthy, false, false);
    let router = router(&h);

    let msg = EditMessage::edit("alice", Some("orphan".into()));
    let out = router
        .route(Uuid::new_v4(), &Actor::trusted("alice"), msg.clone())
        .await
        .unwrap();
    assert_eq!(out, msg);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.versions.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.documents.saves(), 0);
}

#[tokio::test]
async fn test_null_edit_clears_content() {
    let h = harness(Fault::Healthy, false, false);
    let alice = Actor::trusted("alice");
    let doc = create(&h, "alice", "Spec").await;

    router(&h)
        .route(doc.id, &alice, EditMessage::edit("alice", None))
        .await
        .unwrap();
    assert_eq!(h.service.get(doc.id, &alice).await.unwrap().content, "");
}

#[tokio::test]
async fn test_edit_succeeds_while_version_store_stalls() {
    let h = harness(Fault::Stall, false, false);
    let alice = Actor::trusted("alice");
    let doc = Document::new("Spec", None, "alice");
    h.documents.inner.save(&doc).await.unwrap();

    let started = tokio::time::Instant::now();
    router(&h)
        .route(doc.id, &alice, EditMessage::edit("alice", Some("fast".into())))
        .await
        .unwrap();
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(h.service.get(doc.id, &alice).await.unwrap().content, "fast");
}

/// Version store that is slow to write one particular content.
struct SlowWrite {
    inner: MemoryVersionStore,
    slow: &'static str,
}

#[async_trait]
impl VersionStore for SlowWrite {
    async fn create(&self, snapshot: NewSnapshot) -> Result<Snapshot, StoreError> {
        if snapshot.content == self.slow {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.create(snapshot).await
    }

    async fn list_by_document(&self, document_id: DocumentId) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.list_by_document(document_id).await
    }

    async fn get(&self, id: SnapshotId) -> Result<Option<Snapshot>, StoreError> {
        self.inner.get(id).await
    }

    async fn delete_all_for_document(&self, document_id: DocumentId) -> Result<(), StoreError> {
        self.inner.delete_all_for_document(document_id).await
    }
}

/// Poll until `doc` has `n` snapshots; returns them newest first.
async fn wait_for_snapshots(versions: &dyn VersionStore, doc: DocumentId, n: usize) -> Vec<Snapshot> {
    for _ in 0..200 {
        let snapshots = versions.list_by_document(doc).await.unwrap();
        if snapshots.len() >= n {
            return snapshots;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} snapshots for {doc}");
}

#[tokio::test]
async fn test_newest_snapshot_tracks_live_content_under_uneven_latency() {
    let versions = Arc::new(SlowWrite {
        inner: MemoryVersionStore::new(),
        slow: "v1",
    });
    let service = DocService::new(
        Stores {
            documents: Arc::new(MemoryDocumentStore::new()),
            versions: versions.clone(),
            accounts: Arc::new(MemoryAccountDirectory::with_accounts(["alice"])),
        },
        Duration::from_secs(1),
    );
    let alice = Actor::trusted("alice");
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
    let router = service.edit_router(Arc::new(PresenceRegistry::new()));

    for content in ["v1", "v2"] {
        router
            .route(doc.id, &alice, EditMessage::edit("alice", Some(content.into())))
            .await
            .unwrap();
    }

    let snapshots = wait_for_snapshots(&*versions, doc.id, 3).await;
    let live = service.get(doc.id, &alice).await.unwrap().content;
    assert_eq!(live, "v2");
    assert_eq!(snapshots[0].content, live);
    let history: Vec<&str> = snapshots.iter().rev().map(|s| s.content.as_str()).collect();
    assert_eq!(history, ["draft", "v1", "v2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_order_matches_store_order() {
    let versions = Arc::new(MemoryVersionStore::new());
    let service = DocService::new(
        Stores {
            documents: Arc::new(MemoryDocumentStore::new()),
            versions: versions.clone(),
            accounts: Arc::new(MemoryAccountDirectory::with_accounts(["alice"])),
        },
        Duration::from_secs(1),
    );
    let alice = Actor::trusted("alice");
    let doc = service
        .create(
            &alice,
            CreateDocument {
                title: "Spec".into(),
                content: None,
            },
        )
        .await
        .unwrap();
    let router = Arc::new(service.edit_router(Arc::new(PresenceRegistry::new())));
    let topics = TopicRegistry::new(64);
    let (topic, mut rx) = topics.subscribe(doc.id).await;

    let mut handles = Vec::new();
    for i in 0..32 {
        let router = router.clone();
        let topic = topic.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            let msg = EditMessage::edit("alice", Some(format!("rev {i}")));
            router.route_to(&topic, doc.id, &alice, msg).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut broadcast = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        broadcast.push(EditMessage::decode(&frame).unwrap().content.unwrap());
    }
    assert_eq!(broadcast.len(), 32);

    let live = service.get(doc.id, &alice).await.unwrap().content;
    assert_eq!(broadcast.last(), Some(&live));

    let snapshots = wait_for_snapshots(&*versions, doc.id, 33).await;
    let history: Vec<String> = snapshots.into_iter().rev().skip(1).map(|s| s.content).collect();
    assert_eq!(history, broadcast);
}

#[tokio::test]
async fn test_concurrent_edits_and_shares_lose_nothing() {
    let documents: Arc<MemoryDocumentStore> = Arc::new(MemoryDocumentStore::new());
    let versions: Arc<MemoryVersionStore> = Arc::new(MemoryVersionStore::new());
    let service = Arc::new(DocService::new(
        Stores {
            documents: documents.clone(),
            versions: versions.clone(),
            accounts: Arc::new(MemoryAccountDirectory::with_accounts(
                (0..16).map(|i| format!("user{i}")),
            )),
        },
        TIMEOUT,
    ));
    let alice = Actor::trusted("alice");
    let doc = service
        .create(
            &alice,
            CreateDocument {
                title: "Spec".into(),
                content: None,
            },
        )
        .await
        .unwrap();
    let router = Arc::new(service.edit_router(Arc::new(PresenceRegistry::new())));

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        let router = router.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            service.share(doc.id, &alice, &format!("user{i}")).await.unwrap();
            router
                .route(doc.id, &alice, EditMessage::edit("alice", Some(format!("rev {i}"))))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = documents.get(doc.id).await.unwrap().unwrap();
    assert_eq!(stored.collaborators.len(), 16);
    assert!(stored.content.starts_with("rev "));
}

// ─── Presence ───────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_join_leave_is_linearizable() {
    let presence = Arc::new(PresenceRegistry::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let mut shared = Document::new("Spec", None, "owner");
    for i in 0..32 {
        shared.add_collaborator(&format!("user{i:02}"));
    }
    documents.save(&shared).await.unwrap();
    let router = Arc::new(EditRouter::new(
        presence.clone(),
        documents,
        Arc::new(SnapshotPublisher::new(Arc::new(MemoryVersionStore::new()), TIMEOUT)),
        Arc::new(DocumentLocks::new()),
    ));
    let doc = shared.id;

    let mut handles = Vec::new();
    for i in 0..32 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("user{i:02}");
            let actor = Actor::trusted(name.clone());
            let joined = router.route(doc, &actor, EditMessage::join(&name)).await.unwrap();
            assert!(joined.content.unwrap().split(',').any(|n| n == name));
            if i % 2 == 0 {
                let left = router.route(doc, &actor, EditMessage::leave(&name)).await.unwrap();
                assert!(!left.content.unwrap().split(',').any(|n| n == name));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let remaining = presence.active_participants(doc).await;
    assert_eq!(remaining.len(), 16);
    let rendered = remaining.render();
    let mut sorted: Vec<&str> = rendered.split(',').collect();
    sorted.sort();
    assert_eq!(rendered.split(',').collect::<Vec<_>>(), sorted);
}
