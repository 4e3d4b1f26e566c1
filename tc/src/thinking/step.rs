//! Thinking step and context types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of analysis a step reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    HistoryUpdate,
    KeywordExtraction,
    DomainIdentification,
    QuestionType,
    ContextAnalysis,
    /// Model answer text; never produced by the analyzer
    Response,
}

impl StepType {
    /// Steps in the order the analyzer emits them
    pub const ANALYSIS: [StepType; 5] = [
        StepType::HistoryUpdate,
        StepType::KeywordExtraction,
        StepType::DomainIdentification,
        StepType::QuestionType,
        StepType::ContextAnalysis,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StepType::HistoryUpdate => "history-update",
            StepType::KeywordExtraction => "keyword-extraction",
            StepType::DomainIdentification => "domain-identification",
            StepType::QuestionType => "question-type",
            StepType::ContextAnalysis => "context-analysis",
            StepType::Response => "response",
        }
    }

    pub fn is_thinking(&self) -> bool {
        *self != StepType::Response
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One labeled analysis step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub step_type: StepType,
    pub content: String,
    /// 0-based position within one analyze call
    pub order: usize,
    pub session_id: String,
    pub created_at: i64,
}

/// What the analyzer concluded about the latest input of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingContext {
    pub session_id: String,
    pub user_input: String,
    pub keywords: Vec<String>,
    pub domain: String,
    pub question_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_labels() {
        let labels: Vec<&str> = StepType::ANALYSIS.iter().map(StepType::label).collect();
        assert_eq!(
            labels,
            vec![
                "history-update",
                "keyword-extraction",
                "domain-identification",
                "question-type",
                "context-analysis"
            ]
        );
        assert_eq!(StepType::Response.to_string(), "response");
    }

    #[test]
    fn test_step_type_serde_matches_label() {
        for step_type in StepType::ANALYSIS.iter().chain([StepType::Response].iter()) {
            let json = serde_json::to_string(step_type).unwrap();
            assert_eq!(json, format!("\"{}\"", step_type.label()));
        }
    }

    #[test]
    fn test_only_response_is_not_thinking() {
        assert!(StepType::ANALYSIS.iter().all(StepType::is_thinking));
        assert!(!StepType::Response.is_thinking());
    }
}
