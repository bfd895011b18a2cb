//! Documents, snapshots and the verified actor identity.
//!
//! The [`Document`] is the unit of authority: every permission check
//! resolves through its owner and collaborator set. [`Snapshot`]s are
//! owned by the version store; the core only produces [`NewSnapshot`]
//! write requests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollabError;

/// Opaque document identity.
pub type DocumentId = Uuid;

/// Version-store-assigned snapshot identity.
pub type SnapshotId = u64;

/// An already-authenticated username attached to a request or session.
///
/// The core never verifies identities itself; it only refuses to run
/// without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor(String);

impl Actor {
    /// Build from the gateway-injected identity header.
    ///
    /// Fails closed: an absent or blank value is `Unauthenticated`.
    pub fn from_header(value: Option<&str>) -> Result<Self, CollabError> {
        match value.map(str::trim) {
            Some(name) if !name.is_empty() => Ok(Self(name.to_string())),
            _ => Err(CollabError::Unauthenticated),
        }
    }

    /// Wrap an identity that an in-process caller has already verified.
    pub fn trusted(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn username(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Privilege an operation requires on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
    /// Share, revoke, delete.
    Admin,
}

/// A shared text document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    #[serde(rename = "ownerUsername")]
    pub owner: String,
    pub collaborators: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document owned by `owner`. Absent content becomes `""`.
    pub fn new(title: impl Into<String>, content: Option<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.unwrap_or_default(),
            owner: owner.into(),
            collaborators: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self, username: &str) -> bool {
        self.owner == username
    }

    pub fn is_collaborator(&self, username: &str) -> bool {
        self.collaborators.contains(username)
    }

    /// Owner or collaborator.
    pub fn is_participant(&self, username: &str) -> bool {
        self.is_owner(username) || self.is_collaborator(username)
    }

    /// Add a collaborator. Returns `false` if nothing changed.
    ///
    /// The owner is never admitted to its own collaborator set.
    pub fn add_collaborator(&mut self, username: &str) -> bool {
        if self.is_owner(username) {
            return false;
        }
        self.collaborators.insert(username.to_string())
    }

    /// Remove a collaborator. Returns `false` if they were not one.
    pub fn remove_collaborator(&mut self, username: &str) -> bool {
        self.collaborators.remove(username)
    }

    /// Replace the content (absent → `""`) and bump `updated_at`.
    pub fn replace_content(&mut self, content: Option<String>) {
        self.content = content.unwrap_or_default();
        self.touch();
    }

    /// Mark the document as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Listing view: same metadata, content omitted.
    pub fn without_content(mut self) -> Self {
        self.content = String::new();
        self
    }
}

/// Immutable full copy of a document's content at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: SnapshotId,
    pub document_id: DocumentId,
    #[serde(rename = "authorUsername")]
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Write request for a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot {
    pub document_id: DocumentId,
    #[serde(rename = "authorUsername")]
    pub author: String,
    pub content: String,
}

impl NewSnapshot {
    pub fn new(document_id: DocumentId, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id,
            author: author.into(),
            content: content.into(),
        }
    }
}
