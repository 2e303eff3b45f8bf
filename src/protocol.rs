//! Binary wire protocol for sandbox synchronization.
//!
//! Every frame is one bincode-encoded [`WireMessage`]. The update path is the
//! interesting part:
//!
//! ```text
//! ┌────────────┐  Update(kind, content,   ┌────────────┐  Updated(...)  ┌────────────┐
//! │  editing   │  version, flags)         │   server   │ ──────────────►│ every other│
//! │  client    │ ────────────────────────►│   relay    │  UpdateAck     │   client   │
//! └────────────┘                          └────────────┘ ──► sender     └────────────┘
//! ```
//!
//! Continuous frames are a live-typing preview: broadcast, never persisted,
//! never acked. Session-start and final frames are persisted and acked.

use serde::{Deserialize, Serialize};

/// Which shared document a frame refers to.
///
/// The HTML document and the CSS stylesheet have fully independent
/// synchronization state; they never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocKind {
    Html,
    Css,
}

impl DocKind {
    /// All kinds, in storage order.
    pub const ALL: [DocKind; 2] = [DocKind::Html, DocKind::Css];

    /// Stable storage/log key.
    pub fn as_str(self) -> &'static str {
        match self {
            DocKind::Html => "html",
            DocKind::Css => "css",
        }
    }

    /// Dense index for per-kind arrays.
    pub fn as_index(self) -> usize {
        match self {
            DocKind::Html => 0,
            DocKind::Css => 1,
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document update on the wire.
///
/// `version` is assigned once per edit session, not per keystroke: the
/// session-start frame, every continuous frame and the final frame of one
/// session all carry the same number. `(team_label, version)` is the real
/// identity of an edit session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub kind: DocKind,
    /// Full snapshot of the document. The protocol ships whole values;
    /// diffing happens on the receiving side.
    pub content: String,
    pub team_label: String,
    pub version: u64,
    /// Mid-session live-typing frame. Broadcast only, never persisted.
    pub continuous: bool,
    /// Session-end frame. Always persisted, exactly one per session.
    pub is_final: bool,
}

impl UpdateMessage {
    /// Session-start frame (persisted, not continuous, not final).
    pub fn session_start(
        kind: DocKind,
        content: impl Into<String>,
        team_label: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            team_label: team_label.into(),
            version,
            continuous: false,
            is_final: false,
        }
    }

    /// Mid-session frame.
    pub fn continuous(
        kind: DocKind,
        content: impl Into<String>,
        team_label: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            team_label: team_label.into(),
            version,
            continuous: true,
            is_final: false,
        }
    }

    /// Session-end frame.
    pub fn final_edit(
        kind: DocKind,
        content: impl Into<String>,
        team_label: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            team_label: team_label.into(),
            version,
            continuous: false,
            is_final: true,
        }
    }

    /// A frame the relay must persist (anything that is not a live preview).
    pub fn persisted(&self) -> bool {
        !self.continuous
    }
}

/// Top-level protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Client requests a team label for this connection.
    Auth { team_label: String },
    /// Label accepted and registered.
    AuthSuccess { team_label: String },
    /// Label rejected (taken by an active connection).
    AuthError { message: String },
    /// Client asks for the current documents.
    InitializeCode,
    /// Initialization acknowledged; the documents follow as `Updated` frames.
    CodeInitialized,
    /// Document update, client to server.
    Update(UpdateMessage),
    /// Document update, relayed to every other connection. Also carries the
    /// system-labeled initial/reset content.
    Updated(UpdateMessage),
    /// Persistence confirmation for a non-continuous update, sender only.
    UpdateAck { kind: DocKind, version: u64 },
    /// Documents were reset to the starter templates; fresh content follows.
    CodeReset,
    /// Local cursor position, client to server.
    CursorPosition { x: f32, y: f32, team_label: String },
    /// Peer cursor position, relayed to every other connection.
    CursorMoved { x: f32, y: f32, team_label: String },
    /// Number of authenticated connections.
    OnlineCount { count: usize },
    /// An authenticated connection went away.
    UserDisconnected { team_label: String },
}

impl WireMessage {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
