//! Streaming boundary.
//!
//! Every reasoning call is tagged with the role it plays in the turn. While
//! a turn streams, all calls feed tagged tokens into one channel; only
//! tokens from final-answer calls ever reach the caller.

use crate::router::Route;
use serde::{Deserialize, Serialize};

/// Role of a reasoning call within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTag {
    Router,
    Grader,
    Rewrite,
    /// Intermediate generation (multi-query expansion, pipeline sub-steps)
    Internal,
    /// Generation whose text is the user-facing answer
    FinalAnswer,
}

/// One streamed token and the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedToken {
    pub tag: CallTag,
    pub content: String,
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// An answer passed the quality gates (or needed none)
    Done,
    /// The retry budget ran out and the fixed answer was returned
    Fallback,
}

/// Event emitted to the caller of a streaming turn.
///
/// Zero or more `Token`s, then exactly one `Done` or `Error`.
///
/// Every Generate call streams its tokens as they arrive, before any grader
/// has seen the draft. When a draft is rejected and regenerated, or the turn
/// ends in the fallback answer, the `Token`s already sent include text that is
/// not the final answer. Consumers that need the final text read
/// `Done::answer`, not the concatenated tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Token {
        content: String,
    },
    Done {
        route: Route,
        /// Authoritative final answer. May differ from the streamed tokens
        answer: String,
        retry_count: u32,
        terminal: Terminal,
    },
    Error {
        message: String,
    },
}

/// Drops tokens from internal calls.
#[derive(Debug, Clone, Copy)]
pub struct TokenFilter {
    visible: CallTag,
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self {
            visible: CallTag::FinalAnswer,
        }
    }
}

impl TokenFilter {
    pub fn apply(&self, token: TaggedToken) -> Option<StreamEvent> {
        (token.tag == self.visible && !token.content.is_empty()).then_some(StreamEvent::Token {
            content: token.content,
        })
    }

    /// Filter a whole sequence, preserving order.
    pub fn filter_all(&self, tokens: impl IntoIterator<Item = TaggedToken>) -> Vec<StreamEvent> {
        tokens.into_iter().filter_map(|t| self.apply(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(tag: CallTag, content: &str) -> TaggedToken {
        TaggedToken {
            tag,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_only_final_answer_tokens_pass() {
        let mixed = vec![
            token(CallTag::Router, "{\"target\""),
            token(CallTag::Router, ": \"income_tax\"}"),
            token(CallTag::FinalAnswer, "종합소득세율은 "),
            token(CallTag::Grader, "{\"Score\": 1}"),
            token(CallTag::Internal, "제55조"),
            token(CallTag::FinalAnswer, "6%~45%입니다."),
        ];

        let events = TokenFilter::default().filter_all(mixed);

        assert_eq!(
            events,
            vec![
                StreamEvent::Token {
                    content: "종합소득세율은 ".to_string()
                },
                StreamEvent::Token {
                    content: "6%~45%입니다.".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_event_wire_format() {
        let token = serde_json::to_value(StreamEvent::Token {
            content: "세".to_string(),
        })
        .unwrap();
        assert_eq!(token, serde_json::json!({"type": "token", "content": "세"}));

        let error = serde_json::to_value(StreamEvent::Error {
            message: "LLM error: timeout".to_string(),
        })
        .unwrap();
        assert_eq!(error["type"], "error");

        let done = serde_json::to_value(StreamEvent::Done {
            route: Route::IncomeTax,
            answer: "a".to_string(),
            retry_count: 1,
            terminal: Terminal::Fallback,
        })
        .unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["route"], "income_tax");
        assert_eq!(done["terminal"], "fallback");
    }
}
