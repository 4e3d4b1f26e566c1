//! Session summary rules
//!
//! The summary is a short, deterministic digest of what the user has told
//! us: who they are and what they asked. Clients compare it verbatim, so the
//! wording below is part of the wire contract.

use crate::turn::{Role, Turn};

/// Prefix that marks a self-introduction ("I am Alice")
pub const IDENTITY_MARKER: &str = "I am ";

/// Summary reported for unknown sessions and sessions with no turns yet
pub const NO_SUMMARY_YET: &str = "no summary yet";

/// Summary reported when no user turn matched any rule
pub const NO_KEY_INFORMATION: &str = "no key information";

/// Summarize the user turns of a history
///
/// Identity lines take precedence: a turn that introduces the user is not
/// also reported as a question.
pub fn summarize<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> String {
    let lines: Vec<String> = turns
        .into_iter()
        .filter(|turn| turn.role == Role::User)
        .filter_map(|turn| key_point(&turn.content))
        .collect();

    if lines.is_empty() {
        NO_KEY_INFORMATION.to_string()
    } else {
        lines.join("\n")
    }
}

fn key_point(content: &str) -> Option<String> {
    if let Some(rest) = content.strip_prefix(IDENTITY_MARKER) {
        Some(format!("user identity: {}", rest))
    } else if content.contains(['？', '?']) {
        Some(format!("user question: {}", content))
    } else {
        None
    }
}

/// Extract the name from a self-introduction, ignoring surrounding whitespace
pub fn identity(content: &str) -> Option<&str> {
    content
        .trim()
        .strip_prefix(IDENTITY_MARKER)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}
