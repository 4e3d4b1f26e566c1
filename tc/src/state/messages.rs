//! Session actor messages
//!
//! Commands and responses for the per-session actor.

use serde_json::Value;
use sessionstore::{Session, SessionError, Turn};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from session store operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session was cleared or expired while a request still used it
    #[error("Session {0} is gone")]
    SessionGone(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to a session actor
#[derive(Debug)]
pub enum StateCommand {
    Snapshot {
        reply: oneshot::Sender<StateResponse<Session>>,
    },
    AppendTurn {
        turn: Turn,
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    RecentTurns {
        count: usize,
        reply: oneshot::Sender<StateResponse<Vec<Turn>>>,
    },
    Summary {
        reply: oneshot::Sender<StateResponse<String>>,
    },
    SetHistoryBound {
        bound: usize,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    SetMetadata {
        key: String,
        value: Value,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetMetadata {
        key: String,
        reply: oneshot::Sender<StateResponse<Option<Value>>>,
    },

    // Shutdown
    Shutdown,
}
