//! Cross-store consistency for destructive operations.
//!
//! Each step names its policy at the call site:
//!
//! | Operation        | Step                        | Policy     |
//! |------------------|-----------------------------|------------|
//! | delete document  | version cleanup             | BestEffort |
//! |                  | document delete             | authoritative |
//! | purge owned docs | per-doc version cleanup     | BestEffort |
//! |                  | per-doc document delete     | authoritative |
//! | delete account   | purge owned docs            | Strict     |
//! |                  | account removal             | authoritative |
//!
//! A BestEffort step logs its failure and lets the operation continue. A
//! Strict step aborts the operation before anything after it runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcast::{AccessChange, AccessFeed};
use crate::error::CollabError;
use crate::locks::DocumentLocks;
use crate::model::{AccessLevel, Actor, DocumentId};
use crate::permission::authorize;
use crate::storage::{AccountDirectory, DocumentStore, StoreError, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyPolicy {
    /// Failure is recorded and the operation proceeds.
    BestEffort,
    /// Failure aborts the operation.
    Strict,
}

pub struct ConsistencyCoordinator {
    documents: Arc<dyn DocumentStore>,
    versions: Arc<dyn VersionStore>,
    accounts: Arc<dyn AccountDirectory>,
    locks: Arc<DocumentLocks>,
    access: Arc<AccessFeed>,
    timeout: Duration,
}

impl ConsistencyCoordinator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        versions: Arc<dyn VersionStore>,
        accounts: Arc<dyn AccountDirectory>,
        locks: Arc<DocumentLocks>,
        access: Arc<AccessFeed>,
        timeout: Duration,
    ) -> Self {
        Self {
            documents,
            versions,
            accounts,
            locks,
            access,
            timeout,
        }
    }

    /// Owner-only. The document record is always deleted, whatever the
    /// version store does.
    pub async fn delete_document(&self, doc_id: DocumentId, actor: &Actor) -> Result<(), CollabError> {
        let guard = self.locks.lock(doc_id).await;
        let doc = self
            .documents
            .get(doc_id)
            .await?
            .ok_or_else(|| CollabError::not_found("document"))?;
        authorize(&doc, actor, AccessLevel::Admin).into_result()?;

        self.remove_document(doc_id).await?;
        drop(guard);
        self.locks.release(doc_id).await;
        log::info!("doc {doc_id} deleted by {actor}");
        Ok(())
    }

    /// Owner-only. Revoking a non-member is `NotFound` with no write.
    pub async fn revoke(
        &self,
        doc_id: DocumentId,
        actor: &Actor,
        collaborator: &str,
    ) -> Result<(), CollabError> {
        let _guard = self.locks.lock(doc_id).await;
        let mut doc = self
            .documents
            .get(doc_id)
            .await?
            .ok_or_else(|| CollabError::not_found("document"))?;
        authorize(&doc, actor, AccessLevel::Admin).into_result()?;

        if !doc.remove_collaborator(collaborator) {
            return Err(CollabError::not_found("collaborator"));
        }
        doc.touch();
        self.documents.save(&doc).await?;
        self.access.announce(AccessChange::Revoked {
            doc_id,
            username: collaborator.to_string(),
        });
        log::info!("{collaborator} revoked from doc {doc_id}");
        Ok(())
    }

    /// Delete every document `owner` owns. A document-store failure stops
    /// the purge and is returned; version cleanup never does.
    pub async fn purge_owned_by(&self, owner: &str) -> Result<usize, CollabError> {
        let owned = self.documents.list_owned_by(owner).await?;
        for doc in &owned {
            let _guard = self.locks.lock(doc.id).await;
            self.remove_document(doc.id).await?;
        }
        for doc in &owned {
            self.locks.release(doc.id).await;
        }
        log::info!("purged {} documents owned by {owner}", owned.len());
        Ok(owned.len())
    }

    /// Remove the actor's account after purging everything they own.
    ///
    /// If the purge fails the account is left untouched.
    pub async fn delete_account(&self, actor: &Actor) -> Result<usize, CollabError> {
        let username = actor.username();
        let purged = self
            .run_step("purge owned documents", ConsistencyPolicy::Strict, async {
                self.purge_owned_by(username).await
            })
            .await?
            .unwrap_or_default();

        self.accounts
            .delete_account(username)
            .await
            .map_err(|e| CollabError::from_dependency("identity service", e))?;
        log::info!("account {username} deleted after purging {purged} documents");
        Ok(purged)
    }

    /// Version cleanup (BestEffort) then the authoritative record delete.
    async fn remove_document(&self, doc_id: DocumentId) -> Result<(), CollabError> {
        self.run_step("version cleanup", ConsistencyPolicy::BestEffort, async {
            match tokio::time::timeout(self.timeout, self.versions.delete_all_for_document(doc_id)).await {
                Ok(result) => result.map_err(|e| CollabError::from_dependency("version store", e)),
                Err(_) => Err(CollabError::from_dependency(
                    "version store",
                    StoreError::Timeout { service: "version store" },
                )),
            }
        })
        .await?;

        self.documents.delete(doc_id).await?;
        self.access.announce(AccessChange::Deleted { doc_id });
        Ok(())
    }

    /// Run one step under `policy`.
    ///
    /// BestEffort: a failure is logged and yields `Ok(None)`.
    /// Strict: a failure is logged and returned.
    async fn run_step<T, F>(
        &self,
        step: &str,
        policy: ConsistencyPolicy,
        fut: F,
    ) -> Result<Option<T>, CollabError>
    where
        F: Future<Output = Result<T, CollabError>>,
    {
        match (fut.await, policy) {
            (Ok(value), _) => Ok(Some(value)),
            (Err(e), ConsistencyPolicy::BestEffort) => {
                log::warn!("{step} failed, continuing: {e}");
                Ok(None)
            }
            (Err(e), ConsistencyPolicy::Strict) => {
                log::error!("{step} failed, aborting: {e}");
                Err(e)
            }
        }
    }
}
