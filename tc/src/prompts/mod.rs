//! Prompt templates
//!
//! The system prompt is a Handlebars template. The default is embedded in the
//! binary and can be replaced with `prompt.system` in the config file.

pub mod embedded;
mod loader;

pub use loader::{PromptContext, PromptLoader};
