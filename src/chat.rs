//! Chat transcript model.
//!
//! Questions are checked locally before anything is sent. Each exchange
//! appends a [`ChatMessage::User`] followed by either an assistant answer
//! or an error; renderers match on the enum exhaustively.

use console::Color;
use thiserror::Error;

use crate::client::{ApiError, GENERIC_ERROR};
use crate::models::{Citation, Confidence, QueryResponse, QueryUsage};
use crate::query::MIN_QUESTION_CHARS;

pub const MAX_QUESTION_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Question is too short ({remaining} more characters needed)")]
    TooShort { remaining: usize },
    #[error("Question is too long (maximum {max} characters)")]
    TooLong { max: usize },
}

/// Returns the trimmed question when it can be submitted.
pub fn validate_question(question: &str) -> Result<String, ValidationError> {
    let trimmed = question.trim();
    let len = trimmed.chars().count();
    if len < MIN_QUESTION_CHARS {
        return Err(ValidationError::TooShort {
            remaining: MIN_QUESTION_CHARS - len,
        });
    }
    if len > MAX_QUESTION_CHARS {
        return Err(ValidationError::TooLong {
            max: MAX_QUESTION_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Characters still needed before a question may be submitted, if any.
pub fn remaining_hint(question: &str) -> Option<usize> {
    match validate_question(question) {
        Err(ValidationError::TooShort { remaining }) => Some(remaining),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceBand {
    High,
    Medium,
    Low,
}

impl RelevanceBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RelevanceBand::High
        } else if score >= 0.6 {
            RelevanceBand::Medium
        } else {
            RelevanceBand::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RelevanceBand::High => "high",
            RelevanceBand::Medium => "medium",
            RelevanceBand::Low => "low",
        }
    }

    pub fn color(self) -> Color {
        match self {
            RelevanceBand::High => Color::Green,
            RelevanceBand::Medium => Color::Yellow,
            // ANSI bright black, shown as gray
            RelevanceBand::Low => Color::Color256(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        content: String,
        citations: Vec<Citation>,
        confidence: Confidence,
        usage: Option<QueryUsage>,
        warning: Option<String>,
    },
    Error {
        message: String,
        partial_citations: Vec<Citation>,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    pub fn from_response(resp: QueryResponse) -> Self {
        ChatMessage::Assistant {
            content: resp.answer,
            citations: resp.citations,
            confidence: resp.confidence,
            usage: Some(resp.usage),
            warning: resp.warning,
        }
    }

    /// Structured refusals keep their partial citations; other failures
    /// keep only their message.
    pub fn from_error(err: &ApiError) -> Self {
        match err {
            ApiError::InsufficientEvidence(ev) => ChatMessage::Error {
                message: ev.message.clone(),
                partial_citations: ev.partial_context.clone(),
            },
            ApiError::Unauthorized(message) | ApiError::Api { message, .. } => {
                ChatMessage::Error {
                    message: message.clone(),
                    partial_citations: Vec::new(),
                }
            }
            ApiError::Cancelled => ChatMessage::Error {
                message: err.to_string(),
                partial_citations: Vec::new(),
            },
            ApiError::Network(_) | ApiError::Decode(_) | ApiError::Storage(_) => {
                ChatMessage::Error {
                    message: GENERIC_ERROR.to_string(),
                    partial_citations: Vec::new(),
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InsufficientEvidence;

    fn citation(score: f64) -> Citation {
        Citation {
            document_id: "d".into(),
            document_title: "Contract".into(),
            page_number: 3,
            section_title: None,
            text_snippet: "Either party may terminate".into(),
            relevance_score: score,
        }
    }

    #[test]
    fn test_short_question_hint() {
        assert_eq!(
            validate_question("  hello  "),
            Err(ValidationError::TooShort { remaining: 5 })
        );
        assert_eq!(remaining_hint("abc"), Some(7));
        assert_eq!(remaining_hint(""), Some(10));
        assert_eq!(remaining_hint("What is the term?"), None);
    }

    #[test]
    fn test_question_bounds() {
        assert_eq!(validate_question(" 0123456789 ").unwrap(), "0123456789");
        assert!(validate_question(&"x".repeat(500)).is_ok());
        assert_eq!(
            validate_question(&"x".repeat(501)),
            Err(ValidationError::TooLong { max: 500 })
        );
    }

    #[test]
    fn test_relevance_bands() {
        assert_eq!(RelevanceBand::from_score(0.85), RelevanceBand::High);
        assert_eq!(RelevanceBand::from_score(0.8), RelevanceBand::High);
        assert_eq!(RelevanceBand::from_score(0.65), RelevanceBand::Medium);
        assert_eq!(RelevanceBand::from_score(0.6), RelevanceBand::Medium);
        assert_eq!(RelevanceBand::from_score(0.4), RelevanceBand::Low);
        assert_eq!(RelevanceBand::High.color(), Color::Green);
        assert_eq!(RelevanceBand::Medium.color(), Color::Yellow);
        assert_eq!(RelevanceBand::Low.color(), Color::Color256(8));
    }

    #[test]
    fn test_insufficient_evidence_keeps_partial_citations() {
        let err = ApiError::InsufficientEvidence(InsufficientEvidence {
            message: "Unable to answer this question based on available documents.".into(),
            reason: "low_confidence".into(),
            suggestions: vec![],
            partial_context: vec![citation(0.55)],
        });
        match ChatMessage::from_error(&err) {
            ChatMessage::Error {
                message,
                partial_citations,
            } => {
                assert!(message.starts_with("Unable to answer"));
                assert_eq!(partial_citations.len(), 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_other_errors_use_message_or_generic() {
        let api = ApiError::Api {
            status: 429,
            message: "Daily query limit (100) reached. Try again tomorrow.".into(),
        };
        assert_eq!(
            ChatMessage::from_error(&api),
            ChatMessage::Error {
                message: "Daily query limit (100) reached. Try again tomorrow.".into(),
                partial_citations: vec![],
            }
        );
        assert_eq!(
            ChatMessage::from_error(&ApiError::Network("connection refused".into())),
            ChatMessage::Error {
                message: GENERIC_ERROR.into(),
                partial_citations: vec![],
            }
        );
    }

    #[test]
    fn test_transcript_order() {
        let mut t = Transcript::new();
        assert!(t.is_empty());
        t.push(ChatMessage::user("What is the termination clause?"));
        t.push(ChatMessage::Error {
            message: "x".into(),
            partial_citations: vec![],
        });
        assert_eq!(t.len(), 2);
        assert!(matches!(t.messages()[0], ChatMessage::User { .. }));
        assert!(matches!(t.last(), Some(ChatMessage::Error { .. })));
    }
}
