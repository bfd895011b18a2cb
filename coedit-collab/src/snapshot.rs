//! Fire-and-forget snapshot publishing to the version store.
//!
//! Every content mutation is versioned, but the write never sits on the
//! editing path: `publish` spawns it and returns at once. A failed or
//! timed-out write is logged and counted, never retried.
//!
//! Writes for one document are chained: each spawned write waits for the
//! previous one to finish, so snapshots land in publish order whatever the
//! store's latency. Different documents never wait on each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::model::{DocumentId, NewSnapshot};
use crate::storage::VersionStore;

/// Default bound on a single snapshot write.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
}

#[derive(Default)]
struct AtomicPublisherStats {
    published: AtomicU64,
    failed: AtomicU64,
}

/// Last queued write per document.
struct Tail {
    seq: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Queues {
    next_seq: u64,
    tails: HashMap<DocumentId, Tail>,
}

pub struct SnapshotPublisher {
    versions: Arc<dyn VersionStore>,
    timeout: Duration,
    stats: Arc<AtomicPublisherStats>,
    queues: Arc<Mutex<Queues>>,
}

impl SnapshotPublisher {
    pub fn new(versions: Arc<dyn VersionStore>, timeout: Duration) -> Self {
        Self {
            versions,
            timeout,
            stats: Arc::new(AtomicPublisherStats::default()),
            queues: Arc::new(Mutex::new(Queues::default())),
        }
    }

    /// Queue a snapshot write behind the document's earlier ones. Awaiting
    /// the handle is optional and never yields an error.
    pub fn publish(
        &self,
        document_id: DocumentId,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> JoinHandle<()> {
        let request = NewSnapshot::new(document_id, author, content);
        let versions = self.versions.clone();
        let stats = self.stats.clone();
        let queues = self.queues.clone();
        let timeout = self.timeout;

        let (done_tx, done_rx) = oneshot::channel();
        let (seq, previous) = {
            let mut q = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            q.next_seq += 1;
            let seq = q.next_seq;
            let previous = q.tails.insert(document_id, Tail { seq, done: done_rx });
            (seq, previous)
        };

        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err: the earlier write's task is gone; nothing to wait for.
                let _ = previous.done.await;
            }

            match tokio::time::timeout(timeout, versions.create(request)).await {
                Ok(Ok(snapshot)) => {
                    stats.published.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Snapshot {} stored for doc {document_id}", snapshot.id);
                }
                Ok(Err(e)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Snapshot for doc {document_id} dropped: {e}");
                }
                Err(_) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Snapshot for doc {document_id} dropped: timed out after {timeout:?}");
                }
            }

            let _ = done_tx.send(());
            let mut q = queues.lock().unwrap_or_else(PoisonError::into_inner);
            if q.tails.get(&document_id).is_some_and(|tail| tail.seq == seq) {
                q.tails.remove(&document_id);
            }
        })
    }

    /// Lock-free read of the counters.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.stats.published.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Documents with a write still queued or in flight.
    pub fn pending_documents(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tails
            .len()
    }
}
