//! Document service: the caller-facing operations.
//!
//! Every operation takes a verified [`Actor`] and resolves to a payload or
//! one [`CollabError`]. Destructive operations are delegated to the
//! [`ConsistencyCoordinator`]; live edits go through an [`EditRouter`]
//! built from the same service so they share write locks and the snapshot
//! publisher.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::broadcast::{AccessChange, AccessFeed};
use crate::coordinator::ConsistencyCoordinator;
use crate::error::CollabError;
use crate::locks::DocumentLocks;
use crate::model::{AccessLevel, Actor, Document, DocumentId, Snapshot, SnapshotId};
use crate::permission::authorize;
use crate::presence::PresenceRegistry;
use crate::router::EditRouter;
use crate::snapshot::SnapshotPublisher;
use crate::storage::{AccountDirectory, DocumentStore, StoreError, VersionStore};

const VERSION_SERVICE: &str = "version store";
const IDENTITY_SERVICE: &str = "identity service";

/// Store backends the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentStore>,
    pub versions: Arc<dyn VersionStore>,
    pub accounts: Arc<dyn AccountDirectory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocument {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDocument {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

pub struct DocService {
    stores: Stores,
    locks: Arc<DocumentLocks>,
    publisher: Arc<SnapshotPublisher>,
    coordinator: ConsistencyCoordinator,
    access: Arc<AccessFeed>,
    timeout: Duration,
}

impl DocService {
    /// `timeout` bounds every call to the version store and identity service.
    pub fn new(stores: Stores, timeout: Duration) -> Self {
        let locks = Arc::new(DocumentLocks::new());
        let publisher = Arc::new(SnapshotPublisher::new(stores.versions.clone(), timeout));
        let access = Arc::new(AccessFeed::default());
        let coordinator = ConsistencyCoordinator::new(
            stores.documents.clone(),
            stores.versions.clone(),
            stores.accounts.clone(),
            locks.clone(),
            access.clone(),
            timeout,
        );
        Self {
            stores,
            locks,
            publisher,
            coordinator,
            access,
            timeout,
        }
    }

    /// Router for live sessions, sharing this service's locks and publisher.
    pub fn edit_router(&self, presence: Arc<PresenceRegistry>) -> EditRouter {
        EditRouter::new(
            presence,
            self.stores.documents.clone(),
            self.publisher.clone(),
            self.locks.clone(),
        )
    }

    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    /// Revocations and deletions from now on.
    pub fn access_changes(&self) -> broadcast::Receiver<AccessChange> {
        self.access.subscribe()
    }

    /// Create a document owned by the actor; its initial content becomes
    /// the first snapshot.
    pub async fn create(&self, actor: &Actor, req: CreateDocument) -> Result<Document, CollabError> {
        let title = non_blank_title(&req.title)?;
        let doc = Document::new(title, req.content, actor.username());
        self.stores.documents.save(&doc).await?;
        log::info!("doc {} created by {actor}", doc.id);

        // Best-effort; the handle never carries an error.
        let _ = self
            .publisher
            .publish(doc.id, actor.username(), doc.content.clone())
            .await;
        Ok(doc)
    }

    pub async fn get(&self, doc_id: DocumentId, actor: &Actor) -> Result<Document, CollabError> {
        let doc = self.load(doc_id).await?;
        authorize(&doc, actor, AccessLevel::Read).into_result()?;
        Ok(doc)
    }

    /// Owned and shared documents, most recently updated first, content
    /// omitted.
    pub async fn list_visible(&self, actor: &Actor) -> Result<Vec<Document>, CollabError> {
        let docs = self.stores.documents.list_visible_to(actor.username()).await?;
        Ok(docs.into_iter().map(Document::without_content).collect())
    }

    /// Replace title and content. Does not publish a snapshot.
    pub async fn update(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        req: UpdateDocument,
    ) -> Result<Document, CollabError> {
        let title = non_blank_title(&req.title)?;
        let _guard = self.locks.lock(doc_id).await;
        let mut doc = self.load(doc_id).await?;
        authorize(&doc, actor, AccessLevel::Write).into_result()?;

        doc.title = title.to_string();
        doc.replace_content(req.content);
        self.stores.documents.save(&doc).await?;
        Ok(doc)
    }

    pub async fn delete(&self, doc_id: DocumentId, actor: &Actor) -> Result<(), CollabError> {
        self.coordinator.delete_document(doc_id, actor).await
    }

    /// Add `invitee` as a collaborator.
    ///
    /// Checked in order: document exists, actor owns it, invitee is not
    /// blank, invitee is not the owner, invitee exists upstream. Sharing
    /// with an existing collaborator succeeds without a write.
    pub async fn share(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        invitee: &str,
    ) -> Result<Document, CollabError> {
        let _guard = self.locks.lock(doc_id).await;
        let mut doc = self.load(doc_id).await?;
        authorize(&doc, actor, AccessLevel::Admin).into_result()?;

        let invitee = invitee.trim();
        if invitee.is_empty() {
            return Err(CollabError::bad_request("username is required"));
        }
        if doc.is_owner(invitee) {
            return Err(CollabError::bad_request("cannot share a document with its owner"));
        }

        let exists = self
            .bounded(IDENTITY_SERVICE, self.stores.accounts.exists(invitee))
            .await?;
        if !exists {
            return Err(CollabError::not_found(format!("user {invitee}")));
        }

        if doc.add_collaborator(invitee) {
            doc.touch();
            self.stores.documents.save(&doc).await?;
            log::info!("doc {doc_id} shared with {invitee}");
        }
        Ok(doc)
    }

    pub async fn revoke(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        collaborator: &str,
    ) -> Result<(), CollabError> {
        self.coordinator.revoke(doc_id, actor, collaborator).await
    }

    /// Snapshot the current content on request. Succeeds even if the
    /// version store rejects the write.
    pub async fn save_snapshot(&self, doc_id: DocumentId, actor: &Actor) -> Result<(), CollabError> {
        // Queue under the write lock so the copy can't overtake a later edit.
        let written = {
            let _guard = self.locks.lock(doc_id).await;
            let doc = self.get(doc_id, actor).await?;
            self.publisher.publish(doc.id, actor.username(), doc.content)
        };
        let _ = written.await;
        Ok(())
    }

    /// Newest first.
    pub async fn list_versions(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
    ) -> Result<Vec<Snapshot>, CollabError> {
        self.get(doc_id, actor).await?;
        self.bounded(VERSION_SERVICE, self.stores.versions.list_by_document(doc_id))
            .await
    }

    /// A snapshot of another document is reported as not found.
    pub async fn get_version(
        &self,
        doc_id: DocumentId,
        version_id: SnapshotId,
        actor: &Actor,
    ) -> Result<Snapshot, CollabError> {
        self.get(doc_id, actor).await?;
        self.bounded(VERSION_SERVICE, self.stores.versions.get(version_id))
            .await?
            .filter(|s| s.document_id == doc_id)
            .ok_or_else(|| CollabError::not_found("version"))
    }

    /// Service-to-service purge of everything `owner` owns. The caller is
    /// authenticated by the boundary, not by an actor.
    pub async fn purge_owned(&self, owner: &str) -> Result<usize, CollabError> {
        self.coordinator.purge_owned_by(owner).await
    }

    pub async fn delete_account(&self, actor: &Actor) -> Result<usize, CollabError> {
        self.coordinator.delete_account(actor).await
    }

    async fn load(&self, doc_id: DocumentId) -> Result<Document, CollabError> {
        self.stores
            .documents
            .get(doc_id)
            .await?
            .ok_or_else(|| CollabError::not_found("document"))
    }

    /// Await a remote call under the service timeout; any failure is
    /// `DependencyUnavailable`.
    async fn bounded<T>(
        &self,
        service: &'static str,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CollabError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| CollabError::from_dependency(service, e)),
            Err(_) => Err(CollabError::from_dependency(service, StoreError::Timeout { service })),
        }
    }
}

fn non_blank_title(title: &str) -> Result<&str, CollabError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CollabError::bad_request("title is required"));
    }
    Ok(title)
}
