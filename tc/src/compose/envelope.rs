//! Client-visible stream items

use serde::{Deserialize, Serialize};
use sessionstore::now_ms;

use crate::thinking::StepType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Thinking,
    Response,
}

impl From<StepType> for EnvelopeKind {
    fn from(step_type: StepType) -> Self {
        if step_type.is_thinking() {
            EnvelopeKind::Thinking
        } else {
            EnvelopeKind::Response
        }
    }
}

/// One paced item of a chat stream
///
/// Serializes as `{"type":"thinking"|"response","content":..,"timestamp":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub content: String,
    /// Release time, epoch millis
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.kind == EnvelopeKind::Thinking
    }
}
