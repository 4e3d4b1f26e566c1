//! Prompt Loader
//!
//! Renders the system prompt and assembles completion requests from a
//! session snapshot.

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use sessionstore::Session;
use tracing::debug;

use crate::llm::{CompletionRequest, Message};

const SYSTEM_TEMPLATE: &str = "system";

/// Context for rendering the system prompt
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    /// Session summary, or the "no summary yet" sentinel
    pub summary: String,
    /// Name from the user's self-introduction
    pub user_name: Option<String>,
}

impl PromptContext {
    pub fn from_session(session: &Session) -> Self {
        debug!(session_id = %session.id, "PromptContext::from_session: called");
        Self {
            summary: session.summary().to_string(),
            user_name: session.user_name().map(str::to_string),
        }
    }
}

/// Compiles the system prompt template once and renders it per request
pub struct PromptLoader {
    hbs: Handlebars<'static>,
}

impl PromptLoader {
    /// Compile the given system prompt template
    ///
    /// Fails on template syntax errors so a bad config is caught at startup.
    pub fn new(system_template: &str) -> Result<Self> {
        debug!(template_len = system_template.len(), "PromptLoader::new: called");
        let mut hbs = Handlebars::new();
        // Prompts are plain text, not HTML
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.register_template_string(SYSTEM_TEMPLATE, system_template)
            .map_err(|e| eyre!("Invalid system prompt template: {}", e))?;
        Ok(Self { hbs })
    }

    /// Render the system prompt
    pub fn render_system(&self, context: &PromptContext) -> Result<String> {
        debug!(has_user_name = context.user_name.is_some(), "PromptLoader::render_system: called");
        self.hbs
            .render(SYSTEM_TEMPLATE, context)
            .map_err(|e| eyre!("Failed to render system prompt: {}", e))
    }

    /// Build a completion request carrying the rendered prompt and the session history
    pub fn build_request(&self, session: &Session, max_tokens: u32) -> Result<CompletionRequest> {
        debug!(session_id = %session.id, turn_count = session.len(), "PromptLoader::build_request: called");
        let system_prompt = self.render_system(&PromptContext::from_session(session))?;
        Ok(CompletionRequest {
            system_prompt,
            messages: Message::from_turns(session.turns()),
            max_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::embedded;
    use sessionstore::{NO_SUMMARY_YET, Turn};

    #[test]
    fn test_render_without_user_name() {
        let loader = PromptLoader::new(embedded::SYSTEM).unwrap();
        let context = PromptContext {
            summary: NO_SUMMARY_YET.to_string(),
            user_name: None,
        };

        let prompt = loader.render_system(&context).unwrap();
        assert!(prompt.contains("Conversation summary:\nno summary yet"));
        assert!(!prompt.contains("introduced themselves"));
    }

    #[test]
    fn test_render_does_not_escape() {
        let loader = PromptLoader::new("{{summary}}").unwrap();
        let context = PromptContext {
            summary: "user question: is 1 < 2 & 3 > 2?".to_string(),
            user_name: None,
        };
        assert_eq!(loader.render_system(&context).unwrap(), "user question: is 1 < 2 & 3 > 2?");
    }

    #[test]
    fn test_invalid_template_rejected() {
        assert!(PromptLoader::new("{{#if user_name}}unclosed").is_err());
    }

    #[test]
    fn test_build_request_from_session() {
        let loader = PromptLoader::new(embedded::SYSTEM).unwrap();
        let mut session = Session::new("s1");
        session.append(Turn::user("I am Alice"));
        session.append(Turn::assistant("Hello Alice"));
        session.append(Turn::user("What is the weather?"));

        let request = loader.build_request(&session, 512).unwrap();

        assert!(request.system_prompt.contains("The user introduced themselves as Alice."));
        assert!(
            request
                .system_prompt
                .contains("user identity: Alice\nuser question: What is the weather?")
        );
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2], Message::user("What is the weather?"));
        assert_eq!(request.max_tokens, 512);
    }
}
