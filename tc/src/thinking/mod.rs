//! Thinking-step generation
//!
//! Rule-based analysis of a user message, emitted as labeled steps before
//! the model answer.

mod analyzer;
mod rules;
mod step;

pub use analyzer::{HISTORY_WINDOW, Thinker, ThinkingError};
pub use rules::{GENERAL_DIALOGUE, GENERAL_DOMAIN, extract_keywords, identify_domain, identify_question_type};
pub use step::{StepType, ThinkingContext, ThinkingStep};
