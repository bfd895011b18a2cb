//! Presence registry: who is currently joined to each document.
//!
//! ```text
//! join/leave(doc_id, user)
//!       │
//!       ▼
//! RwLock<HashMap<doc_id, Arc<Mutex<BTreeSet>>>>   (read lock: fast path)
//!       │
//!       ▼
//! per-document Mutex ── mutate ── snapshot set ── ParticipantList
//! ```
//!
//! Mutations on one document serialize on that document's mutex, and the
//! list handed back is read under the same guard that applied the mutation.
//! Distinct documents only share the brief map lookup.
//!
//! Entries are created on first touch and never evicted: an empty set stays
//! in the map so a LEAVE racing a JOIN can never drop a freshly created
//! entry. Presence is process-local and never persisted.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::model::DocumentId;

type ParticipantSet = Arc<Mutex<BTreeSet<String>>>;

/// Active participants of one document, in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantList(Vec<String>);

impl ParticipantList {
    /// Comma-joined broadcast form, no spaces. Empty set renders as `""`.
    pub fn render(&self) -> String {
        self.0.join(",")
    }

    pub fn contains(&self, username: &str) -> bool {
        self.0.iter().any(|p| p == username)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ParticipantList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&BTreeSet<String>> for ParticipantList {
    fn from(set: &BTreeSet<String>) -> Self {
        Self(set.iter().cloned().collect())
    }
}

/// Per-document presence sets.
#[derive(Default)]
pub struct PresenceRegistry {
    documents: RwLock<HashMap<DocumentId, ParticipantSet>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `participant`; idempotent. Returns the set as of this join.
    pub async fn join(&self, doc_id: DocumentId, participant: &str) -> ParticipantList {
        let entry = self.get_or_create(doc_id).await;
        let mut set = entry.lock().await;
        set.insert(participant.to_string());
        ParticipantList::from(&*set)
    }

    /// Remove `participant`; a non-member is a no-op. Returns the set as of
    /// this leave.
    pub async fn leave(&self, doc_id: DocumentId, participant: &str) -> ParticipantList {
        let entry = self.get_or_create(doc_id).await;
        let mut set = entry.lock().await;
        set.remove(participant);
        ParticipantList::from(&*set)
    }

    /// Current participants; empty for a document nobody has joined.
    pub async fn active_participants(&self, doc_id: DocumentId) -> ParticipantList {
        let entry = {
            let documents = self.documents.read().await;
            documents.get(&doc_id).cloned()
        };
        match entry {
            Some(entry) => ParticipantList::from(&*entry.lock().await),
            None => ParticipantList::default(),
        }
    }

    /// Number of documents with an entry, empty or not.
    pub async fn document_count(&self) -> usize {
        self.documents.read().await.len()
    }

    async fn get_or_create(&self, doc_id: DocumentId) -> ParticipantSet {
        // Fast path: read lock
        {
            let documents = self.documents.read().await;
            if let Some(entry) = documents.get(&doc_id) {
                return entry.clone();
            }
        }

        // Slow path: write lock, double-check
        let mut documents = self.documents.write().await;
        documents
            .entry(doc_id)
            .or_insert_with(|| Arc::new(Mutex::new(BTreeSet::new())))
            .clone()
    }
}
