//! # coedit-collab: Collaborative session & consistency core
//!
//! Shared text documents edited live by several users, with presence,
//! an owner/collaborator permission model, and a version history kept
//! in a separate store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  WebSocket (JSON)  ┌────────────────┐
//! │ editor tab   │ ◄────────────────► │ RealtimeServer │──► TopicRegistry (fan-out)
//! └──────────────┘                    └───────┬────────┘
//!                                             ▼
//! ┌──────────────┐   HTTP (axum)      ┌────────────────┐    ┌──────────────────┐
//! │ REST client  │ ─────────────────► │ DocService     │───►│ EditRouter       │
//! └──────────────┘                    │  ├ permission  │    │  ├ Presence      │
//!                                     │  └ Coordinator │    │  └ Publisher ──┐ │
//!                                     └───────┬────────┘    └────────────────┼─┘
//!                                             ▼                              ▼
//!                               DocumentStore · AccountDirectory     VersionStore
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Document, snapshot and actor identity types
//! - [`error`]: Caller-facing error taxonomy
//! - [`permission`]: Read/Write/Admin guard
//! - [`presence`]: Per-document participant sets
//! - [`protocol`]: JSON realtime frames
//! - [`router`]: JOIN/LEAVE/EDIT/CURSOR transitions
//! - [`locks`]: Per-document write serialization
//! - [`snapshot`]: Ordered, fire-and-forget version publishing
//! - [`coordinator`]: Best-effort vs strict cross-store deletes
//! - [`service`]: Caller-facing document operations
//! - [`storage`]: Store traits, memory and RocksDB backends
//! - [`remote`]: HTTP clients for the version and identity services
//! - [`broadcast`]: Per-document fan-out topics and the access-change feed
//! - [`server`]: WebSocket realtime server
//! - [`http`]: REST API router

pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod locks;
pub mod model;
pub mod permission;
pub mod presence;
pub mod protocol;
pub mod remote;
pub mod router;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{AccessChange, AccessFeed, Topic, TopicRegistry, TopicStats};
pub use coordinator::{ConsistencyCoordinator, ConsistencyPolicy};
pub use error::{CollabError, ErrorKind};
pub use http::ApiState;
pub use locks::DocumentLocks;
pub use model::{AccessLevel, Actor, Document, DocumentId, NewSnapshot, Snapshot, SnapshotId};
pub use permission::{authorize, Decision, DenyReason};
pub use presence::{ParticipantList, PresenceRegistry};
pub use protocol::{EditMessage, ErrorFrame, MessageKind, ProtocolError};
pub use remote::{HttpAccountDirectory, HttpVersionStore, RemoteConfig};
pub use router::EditRouter;
pub use server::{RealtimeConfig, RealtimeServer, ServerStats};
pub use service::{CreateDocument, DocService, Stores, UpdateDocument};
pub use snapshot::{PublisherStats, SnapshotPublisher};
pub use storage::{
    AccountDirectory, DocumentStore, MemoryAccountDirectory, MemoryDocumentStore,
    MemoryVersionStore, RocksDocumentStore, StoreConfig, StoreError, VersionStore,
};
