//! Caller-facing error taxonomy.
//!
//! Every operation of the core resolves to one [`CollabError`]. Boundaries
//! (the HTTP API, realtime error frames) never match on variants directly;
//! they map from [`ErrorKind`] so that clients can react to a stable,
//! closed set of outcomes:
//!
//! | Kind | Client reaction |
//! |------|-----------------|
//! | `UNAUTHENTICATED` | re-login |
//! | `FORBIDDEN` | hide controls |
//! | `NOT_FOUND` | drop stale reference |
//! | `BAD_REQUEST` | fix input |
//! | `DEPENDENCY_UNAVAILABLE` | show "service degraded" |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StoreError;

/// Stable error classification exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    Forbidden,
    BadRequest,
    DependencyUnavailable,
    /// Reserved for optimistic-concurrency checks on document updates.
    Conflict,
    Internal,
}

/// Errors returned by the collaboration core.
#[derive(Debug, Error)]
pub enum CollabError {
    /// No verified actor identity was attached to the request.
    #[error("missing verified actor identity")]
    Unauthenticated,

    /// Document, version or collaborator does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Authenticated, but not allowed to do this.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed or self-referential input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A downstream service was unreachable or timed out.
    #[error("{service} unavailable: {reason}")]
    DependencyUnavailable {
        service: &'static str,
        reason: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    /// A store backend failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CollabError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    /// Classify this error for the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(e) if e.is_dependency_failure() => ErrorKind::DependencyUnavailable,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Re-classify a store failure of a remote dependency as
    /// `DependencyUnavailable` naming that service.
    pub(crate) fn from_dependency(service: &'static str, err: StoreError) -> Self {
        Self::DependencyUnavailable {
            service,
            reason: err.to_string(),
        }
    }
}
