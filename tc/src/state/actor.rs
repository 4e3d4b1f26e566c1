//! Per-session actor
//!
//! Each session is owned by one task. Every read and write for that session
//! is a command on its channel, so appends are applied one at a time and a
//! snapshot never sees a turn without its recomputed summary.

use serde_json::Value;
use sessionstore::{Session, Turn};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{StateCommand, StateError, StateResponse};

/// Commands buffered per session before senders wait
const SESSION_CHANNEL_CAPACITY: usize = 32;

/// Handle to send commands to one session actor
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<StateCommand>,
}

impl SessionHandle {
    /// Spawn an actor owning `session`
    pub fn spawn(session: Session) -> Self {
        debug!(session_id = %session.id, "SessionHandle::spawn: called");
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        tokio::spawn(actor_loop(session, rx));
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    pub async fn snapshot(&self) -> StateResponse<Session> {
        self.request(|reply| StateCommand::Snapshot { reply }).await
    }

    /// Append a turn; returns how many old turns were evicted to make room
    pub async fn append(&self, turn: Turn) -> StateResponse<usize> {
        self.request(|reply| StateCommand::AppendTurn { turn, reply }).await
    }

    pub async fn recent(&self, count: usize) -> StateResponse<Vec<Turn>> {
        self.request(|reply| StateCommand::RecentTurns { count, reply }).await
    }

    pub async fn summary(&self) -> StateResponse<String> {
        self.request(|reply| StateCommand::Summary { reply }).await
    }

    pub async fn set_history_bound(&self, bound: usize) -> StateResponse<()> {
        self.request(|reply| StateCommand::SetHistoryBound { bound, reply }).await
    }

    pub async fn set_metadata(&self, key: String, value: Value) -> StateResponse<()> {
        self.request(|reply| StateCommand::SetMetadata { key, value, reply })
            .await
    }

    pub async fn metadata(&self, key: String) -> StateResponse<Option<Value>> {
        self.request(|reply| StateCommand::GetMetadata { key, reply }).await
    }

    /// Ask the actor to stop; pending commands queued before this still run
    pub async fn shutdown(&self) -> StateResponse<()> {
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that owns a Session and processes commands
async fn actor_loop(mut session: Session, mut rx: mpsc::Receiver<StateCommand>) {
    debug!(session_id = %session.id, "actor_loop: session actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Snapshot { reply } => {
                debug!(session_id = %session.id, "actor_loop: Snapshot command");
                let _ = reply.send(Ok(session.clone()));
            }

            StateCommand::AppendTurn { turn, reply } => {
                debug!(session_id = %session.id, role = %turn.role, "actor_loop: AppendTurn command");
                let evicted = session.append(turn);
                let _ = reply.send(Ok(evicted));
            }

            StateCommand::RecentTurns { count, reply } => {
                debug!(session_id = %session.id, %count, "actor_loop: RecentTurns command");
                let _ = reply.send(Ok(session.recent(count)));
            }

            StateCommand::Summary { reply } => {
                debug!(session_id = %session.id, "actor_loop: Summary command");
                let _ = reply.send(Ok(session.summary().to_string()));
            }

            StateCommand::SetHistoryBound { bound, reply } => {
                debug!(session_id = %session.id, %bound, "actor_loop: SetHistoryBound command");
                let result = session.set_max_turns(bound).map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::SetMetadata { key, value, reply } => {
                debug!(session_id = %session.id, %key, "actor_loop: SetMetadata command");
                session.set_metadata(key, value);
                let _ = reply.send(Ok(()));
            }

            StateCommand::GetMetadata { key, reply } => {
                debug!(session_id = %session.id, %key, "actor_loop: GetMetadata command");
                let _ = reply.send(Ok(session.metadata(&key).cloned()));
            }

            StateCommand::Shutdown => {
                debug!(session_id = %session.id, "actor_loop: Shutdown command");
                break;
            }
        }
    }

    debug!(session_id = %session.id, "actor_loop: session actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_actor_append_and_snapshot() {
        let handle = SessionHandle::spawn(Session::new("a1"));

        assert_eq!(handle.append(Turn::user("I am Alice")).await.unwrap(), 0);
        assert_eq!(handle.append(Turn::assistant("Hi Alice")).await.unwrap(), 0);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.user_name(), Some("Alice"));
        assert_eq!(handle.summary().await.unwrap(), "user identity: Alice");
    }

    #[tokio::test]
    async fn test_actor_snapshot_is_detached() {
        let handle = SessionHandle::spawn(Session::new("a2"));
        let before = handle.snapshot().await.unwrap();
        handle.append(Turn::user("hello")).await.unwrap();

        assert!(before.is_empty());
        assert_eq!(handle.snapshot().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_actor_append_reports_evictions() {
        let mut direct = Session::with_max_turns("a5", 2).unwrap();
        let handle = SessionHandle::spawn(direct.clone());

        for content in ["one", "two", "three"] {
            let expected = direct.append(Turn::user(content));
            assert_eq!(handle.append(Turn::user(content)).await.unwrap(), expected);
        }
        assert_eq!(handle.snapshot().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_actor_rejects_zero_bound() {
        let handle = SessionHandle::spawn(Session::new("a3"));
        let err = handle.set_history_bound(0).await.unwrap_err();
        assert!(matches!(err, StateError::Session(_)));
    }

    #[tokio::test]
    async fn test_actor_shutdown_closes_channel() {
        let handle = SessionHandle::spawn(Session::new("a4"));
        handle.shutdown().await.unwrap();

        // Wait for the actor to drain and drop its receiver
        handle.tx.closed().await;
        assert!(matches!(handle.snapshot().await, Err(StateError::ChannelError)));
    }
}
