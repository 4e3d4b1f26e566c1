//! Thinker - derives the analysis steps for one user input

use std::collections::HashMap;
use std::sync::Arc;

use sessionstore::{Turn, now_ms};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::rules::{extract_keywords, identify_domain, identify_question_type};
use super::step::{StepType, ThinkingContext, ThinkingStep};
use crate::state::{SessionStore, StateError};

/// Turns of history shown in the analysis
pub const HISTORY_WINDOW: usize = 5;

/// Errors from step generation
#[derive(Debug, Error)]
pub enum ThinkingError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Generates thinking steps and caches the latest context per session
#[derive(Clone)]
pub struct Thinker {
    store: SessionStore,
    contexts: Arc<RwLock<HashMap<String, ThinkingContext>>>,
}

impl Thinker {
    pub fn new(store: SessionStore) -> Self {
        debug!("Thinker::new: called");
        Self {
            store,
            contexts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Analyze `input` against the recent history of `session_id`
    ///
    /// Returns the five analysis steps in fixed order with orders `0..5`.
    /// The session's cached context is replaced, not merged.
    pub async fn analyze(&self, session_id: &str, input: &str) -> Result<Vec<ThinkingStep>, ThinkingError> {
        debug!(%session_id, input_len = input.len(), "analyze: called");
        if session_id.trim().is_empty() {
            return Err(ThinkingError::Validation("session id must not be blank".to_string()));
        }
        if input.trim().is_empty() {
            return Err(ThinkingError::Validation("input must not be blank".to_string()));
        }

        let recent = self.store.recent_turns(session_id, HISTORY_WINDOW).await?;
        let history = format_history(&recent);
        let keywords = extract_keywords(input);
        let joined_keywords = keywords.join(", ");
        let domain = identify_domain(input);
        let question_type = identify_question_type(input);
        debug!(%session_id, keyword_count = keywords.len(), %domain, %question_type, "analyze: rules applied");

        let contents = [
            format!("Conversation history:\n{}", history),
            format!("Extracted keywords: {}", joined_keywords),
            format!("Domain: {}", domain),
            format!("Question type: {}", question_type),
            format!(
                "Context analysis:\n1. Conversation history:\n{}\n2. Current question: {}\n3. Keywords: {}\n4. Domain: {}\n5. Question type: {}\n",
                history, input, joined_keywords, domain, question_type
            ),
        ];

        let created_at = now_ms();
        let steps = StepType::ANALYSIS
            .into_iter()
            .zip(contents)
            .enumerate()
            .map(|(order, (step_type, content))| ThinkingStep {
                step_type,
                content,
                order,
                session_id: session_id.to_string(),
                created_at,
            })
            .collect();

        let context = ThinkingContext {
            session_id: session_id.to_string(),
            user_input: input.to_string(),
            keywords,
            domain: domain.to_string(),
            question_type: question_type.to_string(),
        };
        self.contexts.write().await.insert(session_id.to_string(), context);

        Ok(steps)
    }

    /// Context from the most recent analyze call for the session
    pub async fn find_context(&self, session_id: &str) -> Option<ThinkingContext> {
        debug!(%session_id, "find_context: called");
        self.contexts.read().await.get(session_id).cloned()
    }

    pub async fn clear_context(&self, session_id: &str) -> bool {
        debug!(%session_id, "clear_context: called");
        self.contexts.write().await.remove(session_id).is_some()
    }
}

/// One `role: content` line per turn
fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}\n", turn.role, turn.content))
        .collect()
}
