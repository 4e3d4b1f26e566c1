//! Transport message types
//!
//! Newline-delimited JSON. Each request and each frame is one line of JSON
//! followed by `\n`.

use serde::{Deserialize, Serialize};
use sessionstore::Turn;

use crate::compose::{Envelope, EnvelopeKind};

/// Requests from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    /// Streamed chat: thinking and response frames, then `done`
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        content: String,
    },

    /// Single-shot chat answered with one `reply`
    Send {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        content: String,
    },

    Summary { session_id: String },

    History { session_id: String },

    Clear { session_id: String },

    /// Check the server is alive
    Ping,
}

/// Frames from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Thinking { content: String, timestamp: i64 },

    Response { content: String, timestamp: i64 },

    /// Chat stream finished
    Done { session_id: String },

    Reply { session_id: String, content: String },

    Summary { session_id: String, summary: String },

    History { session_id: String, turns: Vec<Turn> },

    Cleared { session_id: String, removed: bool },

    Pong { version: String },

    /// Request failed; ends a chat stream
    Error { message: String },
}

impl Frame {
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// True for frames after which the server sends nothing more for the request
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Thinking { .. } | Frame::Response { .. })
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        match envelope.kind {
            EnvelopeKind::Thinking => Frame::Thinking {
                content: envelope.content,
                timestamp: envelope.timestamp,
            },
            EnvelopeKind::Response => Frame::Response {
                content: envelope.content,
                timestamp: envelope.timestamp,
            },
        }
    }
}
