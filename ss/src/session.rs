//! Session - bounded conversation history with metadata and summary

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::now_ms;
use crate::summary::{NO_SUMMARY_YET, identity, summarize};
use crate::turn::{Role, Turn};

/// Default number of turns a session retains
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Metadata key holding the name from the user's last self-introduction
pub const USER_NAME_KEY: &str = "user_name";

/// Errors from session operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("History bound must be at least 1, got {0}")]
    InvalidBound(usize),
}

/// A conversation session
///
/// Turns are kept in insertion order in a FIFO ring: once `max_turns` is
/// exceeded the oldest turns are dropped. The summary is recomputed inside
/// [`Session::append`], so any clone of a session carries a summary that
/// matches its turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    turns: VecDeque<Turn>,
    metadata: HashMap<String, Value>,
    summary: Option<String>,
    max_turns: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    /// Create an empty session with the default history bound
    pub fn new(id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            turns: VecDeque::new(),
            metadata: HashMap::new(),
            summary: None,
            max_turns: DEFAULT_MAX_TURNS,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an empty session with a custom history bound
    pub fn with_max_turns(id: impl Into<String>, max_turns: usize) -> Result<Self, SessionError> {
        let mut session = Self::new(id);
        session.set_max_turns(max_turns)?;
        Ok(session)
    }

    /// Append a turn, evict down to the bound, and refresh the summary
    ///
    /// Returns the number of evicted turns.
    pub fn append(&mut self, turn: Turn) -> usize {
        debug!(session_id = %self.id, role = %turn.role, "Session::append: called");
        if turn.role == Role::User
            && let Some(name) = identity(&turn.content)
        {
            debug!(%name, "Session::append: recorded user identity");
            self.metadata
                .insert(USER_NAME_KEY.to_string(), Value::String(name.to_string()));
        }

        self.turns.push_back(turn);

        let mut evicted = 0;
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!(session_id = %self.id, evicted, "Session::append: evicted oldest turns");
        }

        self.summary = Some(summarize(&self.turns));
        self.updated_at = now_ms();
        evicted
    }

    /// The last `min(count, len)` turns, oldest first
    pub fn recent(&self, count: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(start).cloned().collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Current summary, or the "no summary yet" sentinel before the first append
    pub fn summary(&self) -> &str {
        self.summary.as_deref().unwrap_or(NO_SUMMARY_YET)
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Change the history bound
    ///
    /// Existing turns are left alone; the next append evicts down to the new bound.
    pub fn set_max_turns(&mut self, max_turns: usize) -> Result<(), SessionError> {
        if max_turns == 0 {
            return Err(SessionError::InvalidBound(max_turns));
        }
        debug!(session_id = %self.id, old = self.max_turns, new = max_turns, "Session::set_max_turns: called");
        self.max_turns = max_turns;
        Ok(())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
        self.updated_at = now_ms();
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Name from the most recent self-introduction, if any
    pub fn user_name(&self) -> Option<&str> {
        self.metadata.get(USER_NAME_KEY).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::NO_KEY_INFORMATION;
    use proptest::prelude::*;

    fn contents(turns: &[Turn]) -> Vec<String> {
        turns.iter().map(|t| t.content.clone()).collect()
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new("s1");
        assert_eq!(session.id, "s1");
        assert!(session.is_empty());
        assert_eq!(session.max_turns(), DEFAULT_MAX_TURNS);
        assert_eq!(session.summary(), NO_SUMMARY_YET);
        assert!(session.recent(5).is_empty());
    }

    #[test]
    fn test_append_evicts_oldest_first() {
        let mut session = Session::with_max_turns("s1", 3).unwrap();
        for i in 0..5 {
            session.append(Turn::user(format!("msg {}", i)));
        }

        assert_eq!(session.len(), 3);
        assert_eq!(contents(&session.recent(10)), vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_append_reports_evictions() {
        let mut session = Session::with_max_turns("s1", 1).unwrap();
        assert_eq!(session.append(Turn::user("a")), 0);
        assert_eq!(session.append(Turn::user("b")), 1);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut session = Session::new("s1");
        session.append(Turn::user("one"));
        session.append(Turn::assistant("two"));
        session.append(Turn::user("three"));

        assert_eq!(contents(&session.recent(2)), vec!["two", "three"]);
        assert_eq!(contents(&session.recent(0)), Vec::<String>::new());
    }

    #[test]
    fn test_shrinking_bound_is_lazy() {
        let mut session = Session::new("s1");
        for i in 0..10 {
            session.append(Turn::user(format!("{}", i)));
        }

        session.set_max_turns(4).unwrap();
        // Not evicted until the next append
        assert_eq!(session.len(), 10);

        session.append(Turn::user("10"));
        assert_eq!(session.len(), 4);
        assert_eq!(contents(&session.recent(4)), vec!["7", "8", "9", "10"]);
    }

    #[test]
    fn test_zero_bound_rejected() {
        let mut session = Session::new("s1");
        assert_eq!(session.set_max_turns(0), Err(SessionError::InvalidBound(0)));
        assert!(Session::with_max_turns("s2", 0).is_err());
        assert_eq!(session.max_turns(), DEFAULT_MAX_TURNS);
    }

    #[test]
    fn test_summary_recomputed_on_append() {
        let mut session = Session::new("s1");
        session.append(Turn::user("hello"));
        assert_eq!(session.summary(), NO_KEY_INFORMATION);

        session.append(Turn::user("I am Alice"));
        session.append(Turn::user("What is the weather?"));
        assert_eq!(
            session.summary(),
            "user identity: Alice\nuser question: What is the weather?"
        );
    }

    #[test]
    fn test_summary_follows_eviction() {
        let mut session = Session::with_max_turns("s1", 1).unwrap();
        session.append(Turn::user("Why is the sky blue?"));
        session.append(Turn::user("thanks"));
        assert_eq!(session.summary(), NO_KEY_INFORMATION);
    }

    #[test]
    fn test_user_name_from_introduction() {
        let mut session = Session::new("s1");
        assert_eq!(session.user_name(), None);

        session.append(Turn::user("I am Alice"));
        assert_eq!(session.user_name(), Some("Alice"));

        // Assistant turns never set identity
        session.append(Turn::assistant("I am your assistant"));
        assert_eq!(session.user_name(), Some("Alice"));

        session.append(Turn::user("I am Bob"));
        assert_eq!(session.user_name(), Some("Bob"));
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut session = Session::new("s1");
        session.set_metadata("locale", serde_json::json!("en-US"));
        session.set_metadata("count", serde_json::json!(3));

        assert_eq!(session.metadata("locale"), Some(&serde_json::json!("en-US")));
        assert_eq!(session.metadata("count"), Some(&serde_json::json!(3)));
        assert_eq!(session.metadata("missing"), None);
    }

    proptest! {
        #[test]
        fn prop_fifo_keeps_last_bound_turns(bound in 1usize..30, appends in 0usize..80) {
            let mut session = Session::with_max_turns("p", bound).unwrap();
            for i in 0..appends {
                session.append(Turn::user(i.to_string()));
            }

            let kept = session.recent(appends);
            let expected: Vec<String> = (appends.saturating_sub(bound)..appends).map(|i| i.to_string()).collect();
            prop_assert_eq!(contents(&kept), expected);
            prop_assert!(session.len() <= bound);
        }
    }
}
