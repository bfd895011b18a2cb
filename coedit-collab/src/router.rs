//! Edit session router: one transition per message kind.
//!
//! | Kind   | Check | Effect                                   | Returned for broadcast   |
//! |--------|-------|------------------------------------------|--------------------------|
//! | JOIN   | Read  | presence join                            | content = presence list  |
//! | LEAVE  | none  | presence leave                           | content = presence list  |
//! | EDIT   | Write | replace content, touch, publish snapshot | inbound message verbatim |
//! | CURSOR | none  | none                                     | inbound message verbatim |
//!
//! Every message for a document is routed under that document's write
//! lock, and [`EditRouter::route_to`] broadcasts the result before letting
//! go of it. Subscribers therefore see frames in the order the router
//! applied them. Snapshot publishing is queued and never awaited here.

use std::sync::Arc;

use crate::broadcast::Topic;
use crate::error::CollabError;
use crate::locks::DocumentLocks;
use crate::model::{AccessLevel, Actor, DocumentId};
use crate::permission::authorize;
use crate::presence::PresenceRegistry;
use crate::protocol::{EditMessage, MessageKind};
use crate::snapshot::SnapshotPublisher;
use crate::storage::DocumentStore;

pub struct EditRouter {
    presence: Arc<PresenceRegistry>,
    documents: Arc<dyn DocumentStore>,
    publisher: Arc<SnapshotPublisher>,
    locks: Arc<DocumentLocks>,
}

impl EditRouter {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        documents: Arc<dyn DocumentStore>,
        publisher: Arc<SnapshotPublisher>,
        locks: Arc<DocumentLocks>,
    ) -> Self {
        Self {
            presence,
            documents,
            publisher,
            locks,
        }
    }

    /// Apply `msg` to `doc_id` and return the message to broadcast.
    pub async fn route(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        msg: EditMessage,
    ) -> Result<EditMessage, CollabError> {
        let _guard = self.locks.lock(doc_id).await;
        self.apply(doc_id, actor, msg).await
    }

    /// Apply `msg` and publish the result on `topic` while the document is
    /// still locked. Nothing is published for a rejected message.
    pub async fn route_to(
        &self,
        topic: &Topic,
        doc_id: DocumentId,
        actor: &Actor,
        msg: EditMessage,
    ) -> Result<EditMessage, CollabError> {
        let _guard = self.locks.lock(doc_id).await;
        let out = self.apply(doc_id, actor, msg).await?;
        if let Err(e) = topic.publish(&out) {
            log::error!("Failed to publish on doc {doc_id}: {e}");
        }
        Ok(out)
    }

    /// Caller holds the document lock.
    async fn apply(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        msg: EditMessage,
    ) -> Result<EditMessage, CollabError> {
        match msg.kind {
            MessageKind::Join => {
                self.authorize_read(doc_id, actor).await?;
                let list = self.presence.join(doc_id, &msg.sender).await;
                log::info!("{} joined doc {doc_id} ({} active)", msg.sender, list.len());
                Ok(EditMessage {
                    content: Some(list.render()),
                    ..msg
                })
            }
            MessageKind::Leave => {
                let list = self.presence.leave(doc_id, &msg.sender).await;
                log::info!("{} left doc {doc_id} ({} active)", msg.sender, list.len());
                Ok(EditMessage {
                    content: Some(list.render()),
                    ..msg
                })
            }
            MessageKind::Edit => {
                self.apply_edit(doc_id, actor, &msg).await?;
                Ok(msg)
            }
            MessageKind::Cursor => {
                log::trace!("cursor from {} in doc {doc_id}", msg.sender);
                Ok(msg)
            }
        }
    }

    async fn authorize_read(&self, doc_id: DocumentId, actor: &Actor) -> Result<(), CollabError> {
        let doc = self
            .documents
            .get(doc_id)
            .await?
            .ok_or_else(|| CollabError::not_found("document"))?;
        authorize(&doc, actor, AccessLevel::Read).into_result()
    }

    async fn apply_edit(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        msg: &EditMessage,
    ) -> Result<(), CollabError> {
        let Some(mut doc) = self.documents.get(doc_id).await? else {
            log::debug!("EDIT for unknown doc {doc_id} ignored");
            return Ok(());
        };
        authorize(&doc, actor, AccessLevel::Write).into_result()?;

        doc.replace_content(msg.content.clone());
        self.documents.save(&doc).await?;
        log::debug!("doc {doc_id} edited by {} ({} bytes)", msg.sender, doc.content.len());

        // Queued behind earlier snapshots of this document; not awaited.
        let _ = self.publisher.publish(doc_id, msg.sender.clone(), doc.content);
        Ok(())
    }
}
