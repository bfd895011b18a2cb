//! JSON text-frame protocol for live editing sessions.
//!
//! Client → server and server → subscribers:
//! ```text
//! { "sender": "alice", "type": "EDIT", "content": "draft v2", "cursorPosition": null }
//! ```
//! Server → originating socket only, on rejection:
//! ```text
//! { "error": "forbidden: ...", "kind": "FORBIDDEN" }
//! ```
//!
//! `type` is a closed set; anything else fails to decode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CollabError, ErrorKind};

/// Closed set of realtime message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Participant entered the session; content carries the presence list
    Join,
    /// Participant left; content carries the presence list
    Leave,
    /// Whole-document content replacement
    Edit,
    /// Caret movement, relayed only
    Cursor,
}

/// One realtime message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessage {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "cursorPosition", default)]
    pub cursor_position: Option<i64>,
}

impl EditMessage {
    pub fn join(sender: impl Into<String>) -> Self {
        Self::new(sender, MessageKind::Join, None, None)
    }

    pub fn leave(sender: impl Into<String>) -> Self {
        Self::new(sender, MessageKind::Leave, None, None)
    }

    pub fn edit(sender: impl Into<String>, content: Option<String>) -> Self {
        Self::new(sender, MessageKind::Edit, content, None)
    }

    pub fn cursor(sender: impl Into<String>, position: i64) -> Self {
        Self::new(sender, MessageKind::Cursor, None, Some(position))
    }

    fn new(
        sender: impl Into<String>,
        kind: MessageKind,
        content: Option<String>,
        cursor_position: Option<i64>,
    ) -> Self {
        Self {
            sender: sender.into(),
            content,
            kind,
            cursor_position,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

impl std::fmt::Display for EditMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} from {}", self.kind, self.sender)
    }
}

/// Rejection notice sent back to the originating socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub kind: ErrorKind,
}

impl ErrorFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl From<&CollabError> for ErrorFrame {
    fn from(err: &CollabError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

impl From<&ProtocolError> for ErrorFrame {
    fn from(err: &ProtocolError) -> Self {
        Self {
            error: err.to_string(),
            kind: ErrorKind::BadRequest,
        }
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unsupported frame type: {0}")]
    UnsupportedFrame(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_names() {
        let msg = EditMessage::decode(
            r#"{"sender":"alice","type":"CURSOR","content":null,"cursorPosition":42}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Cursor);
        assert_eq!(msg.cursor_position, Some(42));
        assert_eq!(msg.content, None);
    }

    #[test]
    fn test_missing_optional_fields() {
        let msg = EditMessage::decode(r#"{"type":"JOIN"}"#).unwrap();
        assert_eq!(msg.sender, "");
        assert_eq!(msg.content, None);
        assert_eq!(msg.cursor_position, None);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = EditMessage::decode(r#"{"sender":"alice","type":"DELETE"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert_eq!(ErrorFrame::from(&err).kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_encode_uses_type_field() {
        let text = EditMessage::edit("bob", Some("draft v2".into())).encode().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "EDIT");
        assert_eq!(json["content"], "draft v2");
        assert_eq!(json["sender"], "bob");
    }

    #[test]
    fn test_error_frame_from_collab_error() {
        let frame = ErrorFrame::from(&CollabError::forbidden("write access required"));
        assert_eq!(frame.kind, ErrorKind::Forbidden);
        let text = frame.encode().unwrap();
        assert!(text.contains("\"kind\":\"FORBIDDEN\""));
    }
}
