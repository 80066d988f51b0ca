//! Stream events produced by a turn.

use crate::types::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution node that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Model,
    Tool,
    Summarizer,
    Fallback,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Node::Model => "model",
            Node::Tool => "tool",
            Node::Summarizer => "summarizer",
            Node::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Which tool budget was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Run,
    Thread,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitScope::Run => f.write_str("run"),
            LimitScope::Thread => f.write_str("thread"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    ToolBudgetExceeded,
    ModelUnavailable,
    ConcurrentTurn,
    StepLimitExceeded,
    Aborted,
}

/// Non-message event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "diagnostic", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Older history was replaced by a summary.
    Summarized { replaced: usize, kept: usize },
    /// The primary model failed and the secondary answered instead.
    FallbackEngaged {
        primary: String,
        secondary: String,
        reason: String,
    },
    /// A tool call was refused by the limiter.
    ToolLimitReached {
        scope: LimitScope,
        limit: usize,
        tool: String,
    },
    /// The turn failed; state is preserved up to the last successful step.
    Failed {
        kind: FailureKind,
        message: String,
        retryable: bool,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Summarized { replaced, kept } => write!(
                f,
                "Conversation history summarized ({} messages condensed, {} kept)",
                replaced, kept
            ),
            Diagnostic::FallbackEngaged {
                primary,
                secondary,
                reason,
            } => write!(
                f,
                "Model {} failed ({}); switched to {}",
                primary, reason, secondary
            ),
            Diagnostic::ToolLimitReached { scope, limit, tool } => write!(
                f,
                "Tool '{}' not run: {} tool-call limit of {} reached",
                tool, scope, limit
            ),
            Diagnostic::Failed { message, .. } => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Message(Message),
    Diagnostic(Diagnostic),
}

/// One execution step of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub node: Node,
    pub payload: Payload,
}

impl StreamEvent {
    pub fn message(node: Node, message: Message) -> Self {
        Self {
            node,
            payload: Payload::Message(message),
        }
    }

    pub fn diagnostic(node: Node, diagnostic: Diagnostic) -> Self {
        Self {
            node,
            payload: Payload::Diagnostic(diagnostic),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match &self.payload {
            Payload::Message(m) => Some(m),
            Payload::Diagnostic(_) => None,
        }
    }

    pub fn as_diagnostic(&self) -> Option<&Diagnostic> {
        match &self.payload {
            Payload::Diagnostic(d) => Some(d),
            Payload::Message(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.payload, Payload::Diagnostic(Diagnostic::Failed { .. }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags_node() {
        let event = StreamEvent::message(Node::Model, Message::assistant("hi"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["node"], "model");
        assert_eq!(json["payload"]["type"], "message");
    }

    #[test]
    fn test_failure_detection() {
        let event = StreamEvent::diagnostic(
            Node::Model,
            Diagnostic::Failed {
                kind: FailureKind::ModelUnavailable,
                message: "down".to_string(),
                retryable: true,
            },
        );
        assert!(event.is_failure());
        assert!(event.as_message().is_none());
        assert!(!StreamEvent::message(Node::Tool, Message::user("x")).is_failure());
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::ToolLimitReached {
            scope: LimitScope::Run,
            limit: 2,
            tool: "web_search".to_string(),
        };
        assert_eq!(
            d.to_string(),
            "Tool 'web_search' not run: run tool-call limit of 2 reached"
        );
    }
}
