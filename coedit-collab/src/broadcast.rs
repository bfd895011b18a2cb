//! Per-document publish/subscribe topics.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers. Each
//! subscriber gets an independent receiver that buffers up to `capacity`
//! frames; a subscriber that falls further behind skips ahead.
//!
//! Frames are encoded once and shared as `Arc<str>`. A new subscriber only
//! sees frames published after it subscribed. The sender is a subscriber
//! like any other and receives its own frames back.
//!
//! [`AccessFeed`] is the side channel that tells live sessions when their
//! user has lost access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::model::DocumentId;
use crate::protocol::{EditMessage, ProtocolError};

pub type Frame = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicStats {
    pub messages_sent: u64,
    pub subscribers: usize,
}

/// One document's channel.
pub struct Topic {
    sender: broadcast::Sender<Frame>,
    messages_sent: AtomicU64,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Encode once, fan out. Returns the number of receivers reached.
    pub fn publish(&self, msg: &EditMessage) -> Result<usize, ProtocolError> {
        let frame: Frame = Arc::from(msg.encode()?);
        Ok(self.publish_raw(frame))
    }

    /// Fan out a pre-encoded frame.
    pub fn publish_raw(&self, frame: Frame) -> usize {
        // Err only means nobody is listening right now.
        let count = self.sender.send(frame).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> TopicStats {
        TopicStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

/// Maps document ids to topics.
///
/// Subscription and removal both happen under the write lock, so a
/// subscriber can never attach to a topic that is being dropped.
pub struct TopicRegistry {
    topics: RwLock<HashMap<DocumentId, Arc<Topic>>>,
    capacity: usize,
}

impl TopicRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to `doc_id`, creating its topic on first use.
    pub async fn subscribe(&self, doc_id: DocumentId) -> (Arc<Topic>, broadcast::Receiver<Frame>) {
        let mut topics = self.topics.write().await;
        let topic = topics
            .entry(doc_id)
            .or_insert_with(|| Arc::new(Topic::new(self.capacity)))
            .clone();
        let rx = topic.sender.subscribe();
        (topic, rx)
    }

    /// Topic for `doc_id` if anyone has subscribed.
    pub async fn get(&self, doc_id: DocumentId) -> Option<Arc<Topic>> {
        self.topics.read().await.get(&doc_id).cloned()
    }

    /// Drop the topic once its last receiver is gone. The caller must have
    /// dropped its own receiver first.
    pub async fn remove_if_idle(&self, doc_id: DocumentId) -> bool {
        let mut topics = self.topics.write().await;
        match topics.get(&doc_id) {
            Some(topic) if topic.subscriber_count() == 0 => {
                topics.remove(&doc_id);
                true
            }
            _ => false,
        }
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A user losing access to a document they may have a live session on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessChange {
    Revoked { doc_id: DocumentId, username: String },
    Deleted { doc_id: DocumentId },
}

impl AccessChange {
    /// Whether a session of `username` on `doc_id` must end.
    pub fn ends_session(&self, doc_id: DocumentId, username: &str) -> bool {
        match self {
            AccessChange::Revoked { doc_id: d, username: u } => *d == doc_id && u == username,
            AccessChange::Deleted { doc_id: d } => *d == doc_id,
        }
    }
}

/// Process-wide feed of [`AccessChange`]s.
///
/// Announced while the document's write lock is still held, so any frame
/// published after the change is ordered behind it.
pub struct AccessFeed {
    sender: broadcast::Sender<AccessChange>,
}

impl AccessFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn announce(&self, change: AccessChange) {
        // Err only means no session is listening.
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccessChange> {
        self.sender.subscribe()
    }
}

impl Default for AccessFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}
