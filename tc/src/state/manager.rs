//! Session store - registry of per-session actors

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sessionstore::{NO_SUMMARY_YET, Role, Session, SessionError, Turn, USER_NAME_KEY};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::actor::SessionHandle;
use super::messages::{StateError, StateResponse};

/// Counters reported by [`SessionStore::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Sessions currently held in memory
    pub live_sessions: usize,
    /// Sessions created since the store started
    pub sessions_created: u64,
}

struct SessionEntry {
    handle: SessionHandle,
    /// Milliseconds since the store epoch at the last lookup
    last_access: AtomicU64,
}

struct Inner {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    history_bound: usize,
    sessions_created: AtomicU64,
    epoch: Instant,
}

impl Inner {
    fn now(&self) -> u64 {
        millis(self.epoch.elapsed())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// In-memory session store
///
/// Maps session ids to actors. The registry lock is held only to find or
/// insert an entry; all per-session work goes through that session's actor,
/// so unrelated sessions never wait on each other.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create a store whose new sessions retain `history_bound` turns
    pub fn new(history_bound: usize) -> Result<Self, StateError> {
        debug!(%history_bound, "SessionStore::new: called");
        if history_bound == 0 {
            return Err(SessionError::InvalidBound(history_bound).into());
        }
        Ok(Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                history_bound,
                sessions_created: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        })
    }

    /// Look up an existing session, refreshing its idle clock
    async fn lookup(&self, session_id: &str) -> Option<SessionHandle> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(session_id).map(|entry| {
            entry.last_access.store(self.inner.now(), Ordering::Relaxed);
            entry.handle.clone()
        })
    }

    /// Find or create the actor for `session_id`
    ///
    /// Creation happens under the write lock, so concurrent callers with the
    /// same unseen id end up sharing one session.
    async fn lookup_or_create(&self, session_id: &str) -> StateResponse<SessionHandle> {
        if session_id.trim().is_empty() {
            return Err(StateError::Validation("session id must not be blank".to_string()));
        }
        if let Some(handle) = self.lookup(session_id).await {
            return Ok(handle);
        }

        let mut sessions = self.inner.sessions.write().await;
        let now = self.inner.now();
        if let Some(entry) = sessions.get(session_id) {
            debug!(%session_id, "lookup_or_create: created by a concurrent caller");
            entry.last_access.store(now, Ordering::Relaxed);
            return Ok(entry.handle.clone());
        }

        let session = Session::with_max_turns(session_id, self.inner.history_bound)?;
        let handle = SessionHandle::spawn(session);
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                handle: handle.clone(),
                last_access: AtomicU64::new(now),
            },
        );
        self.inner.sessions_created.fetch_add(1, Ordering::Relaxed);
        info!(%session_id, live_sessions = sessions.len(), "Session created");
        Ok(handle)
    }

    /// Snapshot of the session, creating it on first reference
    pub async fn get_or_create(&self, session_id: &str) -> StateResponse<Session> {
        debug!(%session_id, "get_or_create: called");
        self.lookup_or_create(session_id).await?.snapshot().await
    }

    /// Append a turn, evicting the oldest turns over the bound
    ///
    /// Creates the session on first reference. The summary is recomputed
    /// before this returns. Returns the number of evicted turns.
    pub async fn append_turn(&self, session_id: &str, role: Role, content: impl Into<String>) -> StateResponse<usize> {
        debug!(%session_id, %role, "append_turn: called");
        let handle = self.lookup_or_create(session_id).await?;
        handle.append(Turn::new(role, content)).await
    }

    /// Handle of a live session, never creating one
    async fn existing(&self, session_id: &str) -> StateResponse<SessionHandle> {
        self.lookup(session_id)
            .await
            .ok_or_else(|| StateError::SessionGone(session_id.to_string()))
    }

    /// Snapshot of a live session
    ///
    /// Fails with [`StateError::SessionGone`] if the session was cleared or
    /// expired, including while this call was in flight.
    pub async fn snapshot(&self, session_id: &str) -> StateResponse<Session> {
        debug!(%session_id, "snapshot: called");
        let handle = self.existing(session_id).await?;
        handle.snapshot().await.map_err(|e| gone(session_id, e))
    }

    /// Append to a live session; like [`SessionStore::append_turn`] but a
    /// cleared or expired session is reported instead of recreated
    pub async fn append_existing(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> StateResponse<usize> {
        debug!(%session_id, %role, "append_existing: called");
        let handle = self.existing(session_id).await?;
        handle.append(Turn::new(role, content)).await.map_err(|e| gone(session_id, e))
    }

    /// The last `min(count, len)` turns in original order; empty for unknown ids
    pub async fn recent_turns(&self, session_id: &str, count: usize) -> StateResponse<Vec<Turn>> {
        debug!(%session_id, %count, "recent_turns: called");
        match self.lookup(session_id).await {
            Some(handle) => handle.recent(count).await,
            None => Ok(Vec::new()),
        }
    }

    /// Full retained history; empty for unknown ids
    pub async fn history(&self, session_id: &str) -> StateResponse<Vec<Turn>> {
        debug!(%session_id, "history: called");
        match self.lookup(session_id).await {
            Some(handle) => Ok(handle.snapshot().await?.turns().cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Current summary, or "no summary yet" for unknown sessions
    pub async fn summary(&self, session_id: &str) -> StateResponse<String> {
        debug!(%session_id, "summary: called");
        match self.lookup(session_id).await {
            Some(handle) => handle.summary().await,
            None => Ok(NO_SUMMARY_YET.to_string()),
        }
    }

    /// Change how many turns the session retains
    ///
    /// Takes effect on the next append; nothing is evicted here.
    pub async fn set_history_bound(&self, session_id: &str, bound: usize) -> StateResponse<()> {
        debug!(%session_id, %bound, "set_history_bound: called");
        if bound == 0 {
            return Err(StateError::Validation("history bound must be at least 1".to_string()));
        }
        self.lookup_or_create(session_id).await?.set_history_bound(bound).await
    }

    pub async fn set_metadata(&self, session_id: &str, key: impl Into<String>, value: Value) -> StateResponse<()> {
        let key = key.into();
        debug!(%session_id, %key, "set_metadata: called");
        self.lookup_or_create(session_id).await?.set_metadata(key, value).await
    }

    pub async fn metadata(&self, session_id: &str, key: &str) -> StateResponse<Option<Value>> {
        debug!(%session_id, %key, "metadata: called");
        match self.lookup(session_id).await {
            Some(handle) => handle.metadata(key.to_string()).await,
            None => Ok(None),
        }
    }

    /// Name from the user's most recent self-introduction
    pub async fn user_name(&self, session_id: &str) -> StateResponse<Option<String>> {
        debug!(%session_id, "user_name: called");
        let value = self.metadata(session_id, USER_NAME_KEY).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Remove a session; returns false if it did not exist
    pub async fn clear(&self, session_id: &str) -> StateResponse<bool> {
        debug!(%session_id, "clear: called");
        let removed = self.inner.sessions.write().await.remove(session_id);
        match removed {
            Some(entry) => {
                // A concurrent request may still hold the handle; its next command gets ChannelError
                let _ = entry.handle.shutdown().await;
                info!(%session_id, "Session cleared");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn stats(&self) -> StoreStats {
        debug!("stats: called");
        StoreStats {
            live_sessions: self.inner.sessions.read().await.len(),
            sessions_created: self.inner.sessions_created.load(Ordering::Relaxed),
        }
    }

    /// Drop sessions whose last lookup is older than `ttl`; returns how many
    pub async fn expire_idle(&self, ttl: Duration) -> usize {
        let ttl_ms = millis(ttl);
        debug!(ttl_ms, "expire_idle: called");
        let now = self.inner.now();

        let expired: Vec<(String, SessionEntry)> = {
            let mut sessions = self.inner.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| now.saturating_sub(entry.last_access.load(Ordering::Relaxed)) > ttl_ms)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            debug!(session_id = %id, "expire_idle: expiring session");
            let _ = entry.handle.shutdown().await;
        }
        if !expired.is_empty() {
            info!(expired = expired.len(), "Expired idle sessions");
        }
        expired.len()
    }

    /// Run [`SessionStore::expire_idle`] every `interval` until the task is aborted
    pub fn spawn_reaper(&self, interval: Duration, ttl: Duration) -> JoinHandle<()> {
        debug!(interval_ms = millis(interval), ttl_secs = ttl.as_secs(), "spawn_reaper: called");
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.expire_idle(ttl).await;
            }
        })
    }

    /// Stop every session actor and empty the registry
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        let drained: Vec<SessionEntry> = self.inner.sessions.write().await.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            if entry.handle.shutdown().await.is_err() {
                warn!("shutdown: session actor already stopped");
            }
        }
        info!(stopped = drained.len(), "SessionStore shut down");
    }
}

/// A handle whose actor stopped belongs to a session removed under us
fn gone(session_id: &str, err: StateError) -> StateError {
    match err {
        StateError::ChannelError => StateError::SessionGone(session_id.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(turns: &[Turn]) -> Vec<String> {
        turns.iter().map(|t| t.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_get_or_create_new_session() {
        let store = SessionStore::new(20).unwrap();
        let session = store.get_or_create("s1").await.unwrap();

        assert_eq!(session.id, "s1");
        assert!(session.is_empty());
        assert_eq!(session.max_turns(), 20);
        assert_eq!(store.stats().await.sessions_created, 1);
    }

    #[tokio::test]
    async fn test_blank_session_id_rejected() {
        let store = SessionStore::new(20).unwrap();
        assert!(matches!(store.get_or_create("  ").await, Err(StateError::Validation(_))));
        assert!(matches!(
            store.append_turn("", Role::User, "hi").await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_creates_once() {
        let store = SessionStore::new(20).unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create("shared").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = store.stats().await;
        assert_eq!(stats.sessions_created, 1);
        assert_eq!(stats.live_sessions, 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let store = SessionStore::new(100).unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append_turn("s1", Role::User, format!("m{}", i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.history("s1").await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_append_and_recent_turns() {
        let store = SessionStore::new(3).unwrap();
        for i in 0..5 {
            store.append_turn("s1", Role::User, format!("{}", i)).await.unwrap();
        }

        assert_eq!(contents(&store.recent_turns("s1", 2).await.unwrap()), vec!["3", "4"]);
        assert_eq!(contents(&store.history("s1").await.unwrap()), vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_unknown_session_reads() {
        let store = SessionStore::new(20).unwrap();

        assert!(store.recent_turns("nope", 5).await.unwrap().is_empty());
        assert!(store.history("nope").await.unwrap().is_empty());
        assert_eq!(store.summary("nope").await.unwrap(), NO_SUMMARY_YET);
        assert_eq!(store.user_name("nope").await.unwrap(), None);

        // Reads never create sessions
        assert_eq!(store.stats().await.sessions_created, 0);
    }

    #[tokio::test]
    async fn test_summary_after_appends() {
        let store = SessionStore::new(20).unwrap();
        store.get_or_create("s1").await.unwrap();
        assert_eq!(store.summary("s1").await.unwrap(), NO_SUMMARY_YET);

        store.append_turn("s1", Role::User, "I am Alice").await.unwrap();
        store.append_turn("s1", Role::Assistant, "Hello!").await.unwrap();
        store.append_turn("s1", Role::User, "What is the weather?").await.unwrap();

        assert_eq!(
            store.summary("s1").await.unwrap(),
            "user identity: Alice\nuser question: What is the weather?"
        );
        assert_eq!(store.user_name("s1").await.unwrap(), Some("Alice".to_string()));
    }

    #[tokio::test]
    async fn test_set_history_bound_is_lazy() {
        let store = SessionStore::new(20).unwrap();
        for i in 0..6 {
            store.append_turn("s1", Role::User, format!("{}", i)).await.unwrap();
        }

        store.set_history_bound("s1", 2).await.unwrap();
        assert_eq!(store.history("s1").await.unwrap().len(), 6);

        store.append_turn("s1", Role::User, "6").await.unwrap();
        assert_eq!(contents(&store.history("s1").await.unwrap()), vec!["5", "6"]);
    }

    #[tokio::test]
    async fn test_set_history_bound_zero_rejected() {
        let store = SessionStore::new(20).unwrap();
        assert!(matches!(
            store.set_history_bound("s1", 0).await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let store = SessionStore::new(20).unwrap();
        store.set_metadata("s1", "locale", serde_json::json!("zh-CN")).await.unwrap();

        assert_eq!(
            store.metadata("s1", "locale").await.unwrap(),
            Some(serde_json::json!("zh-CN"))
        );
        assert_eq!(store.metadata("s1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_removes_session() {
        let store = SessionStore::new(20).unwrap();
        store.append_turn("s1", Role::User, "hello").await.unwrap();

        assert!(store.clear("s1").await.unwrap());
        assert!(!store.clear("s1").await.unwrap());
        assert!(store.history("s1").await.unwrap().is_empty());
        assert_eq!(store.stats().await.live_sessions, 0);

        // Next reference starts fresh
        let session = store.get_or_create("s1").await.unwrap();
        assert!(session.is_empty());
        assert_eq!(store.stats().await.sessions_created, 2);
    }

    #[tokio::test]
    async fn test_existing_only_operations_never_create() {
        let store = SessionStore::new(20).unwrap();

        assert!(matches!(store.snapshot("s1").await, Err(StateError::SessionGone(id)) if id == "s1"));
        assert!(matches!(
            store.append_existing("s1", Role::Assistant, "late").await,
            Err(StateError::SessionGone(_))
        ));
        assert_eq!(store.stats().await.sessions_created, 0);

        store.append_turn("s1", Role::User, "hello").await.unwrap();
        store.append_existing("s1", Role::Assistant, "hi").await.unwrap();
        assert_eq!(store.snapshot("s1").await.unwrap().len(), 2);

        store.clear("s1").await.unwrap();
        assert!(matches!(
            store.append_existing("s1", Role::Assistant, "late").await,
            Err(StateError::SessionGone(_))
        ));
        assert_eq!(store.stats().await.live_sessions, 0);
    }

    #[tokio::test]
    async fn test_stale_handle_reports_session_gone() {
        let store = SessionStore::new(20).unwrap();
        store.append_turn("s1", Role::User, "hello").await.unwrap();
        let handle = store.lookup("s1").await.unwrap();

        // The shutdown is queued ahead of this append, so the actor never answers it
        store.clear("s1").await.unwrap();
        let err = handle.append(Turn::assistant("late")).await.unwrap_err();
        assert!(matches!(gone("s1", err), StateError::SessionGone(_)));
    }

    #[tokio::test]
    async fn test_append_turn_reports_evictions() {
        let store = SessionStore::new(2).unwrap();
        assert_eq!(store.append_turn("s1", Role::User, "one").await.unwrap(), 0);
        assert_eq!(store.append_turn("s1", Role::User, "two").await.unwrap(), 0);
        assert_eq!(store.append_turn("s1", Role::User, "three").await.unwrap(), 1);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_expire_idle_with_huge_ttl_keeps_sessions() {
        let store = SessionStore::new(20).unwrap();
        store.get_or_create("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.expire_idle(Duration::MAX).await, 0);
        assert_eq!(store.stats().await.live_sessions, 1);
    }

    #[tokio::test]
    async fn test_expire_idle() {
        let store = SessionStore::new(20).unwrap();
        store.get_or_create("old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.get_or_create("fresh").await.unwrap();

        let expired = store.expire_idle(Duration::from_millis(20)).await;

        assert_eq!(expired, 1);
        assert!(store.lookup("old").await.is_none());
        assert!(store.lookup("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_reaper_expires_sessions() {
        let store = SessionStore::new(20).unwrap();
        store.get_or_create("s1").await.unwrap();

        let reaper = store.spawn_reaper(Duration::from_millis(10), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.abort();

        assert_eq!(store.stats().await.live_sessions, 0);
    }

    #[tokio::test]
    async fn test_shutdown_empties_registry() {
        let store = SessionStore::new(20).unwrap();
        store.get_or_create("a").await.unwrap();
        store.get_or_create("b").await.unwrap();

        store.shutdown().await;
        assert_eq!(store.stats().await.live_sessions, 0);
    }

    #[test]
    fn test_zero_default_bound_rejected() {
        assert!(SessionStore::new(0).is_err());
    }
}
