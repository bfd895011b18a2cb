//! Permission guard: a pure predicate over (document, actor, level).
//!
//! | Level | Allowed for |
//! |-------|-------------|
//! | Read  | owner, collaborators |
//! | Write | owner, collaborators |
//! | Admin | owner |
//!
//! A stranger asking for Admin is denied as `NotParticipant`, so the
//! answer never reveals that ownership would have been required.

use crate::error::CollabError;
use crate::model::{AccessLevel, Actor, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotParticipant,
    NotOwner,
}

impl DenyReason {
    fn message(self) -> &'static str {
        match self {
            Self::NotParticipant => "not a participant of this document",
            Self::NotOwner => "only the owner may do this",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> Result<(), CollabError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason) => Err(CollabError::forbidden(reason.message())),
        }
    }
}

/// Decide whether `actor` may act on `doc` at `level`.
pub fn authorize(doc: &Document, actor: &Actor, level: AccessLevel) -> Decision {
    let user = actor.username();
    if !doc.is_participant(user) {
        return Decision::Denied(DenyReason::NotParticipant);
    }
    match level {
        AccessLevel::Read | AccessLevel::Write => Decision::Allowed,
        AccessLevel::Admin if doc.is_owner(user) => Decision::Allowed,
        AccessLevel::Admin => Decision::Denied(DenyReason::NotOwner),
    }
}
