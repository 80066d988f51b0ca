//! Core type definitions for the Wayfarer runtime.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Schema version for persisted messages.
pub const SCHEMA_VERSION: u32 = 1;

/// Message role in conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    /// Only used for synthesized history summaries.
    System,
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCall {
    /// Create a tool call with a freshly generated id.
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            args,
        }
    }

    /// Create a tool call with a provider-assigned id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Message body: plain text or a batch of structured tool calls.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    ToolCalls { calls: Vec<ToolCall> },
}

/// A single message in the conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub role: Role,
    pub content: Content,
    /// Set on tool messages: the id of the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    /// Set on tool messages: the name of the tool that ran.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Message {
    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            role,
            content: Content::Text { text: text.into() },
            tool_call_id: None,
            name: None,
            metadata: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Assistant message requesting one or more tool calls.
    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            role: Role::Assistant,
            content: Content::ToolCalls { calls },
            tool_call_id: None,
            name: None,
            metadata: None,
        }
    }

    /// Tool message carrying the raw result of `call`.
    pub fn tool_result(call: &ToolCall, output: impl Into<String>, is_error: bool) -> Self {
        let mut msg = Self::text(Role::Tool, output);
        msg.tool_call_id = Some(call.id.clone());
        msg.name = Some(call.name.clone());
        if is_error {
            msg.metadata = Some(json!({"is_error": true}));
        }
        msg
    }

    /// Synthesized summary standing in for `replaced` older messages.
    pub fn summary(text: impl Into<String>, replaced: usize) -> Self {
        let mut msg = Self::text(Role::System, text);
        msg.metadata = Some(json!({
            "summary": true,
            "original_count": replaced
        }));
        msg
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            Content::Text { text } => Some(text),
            Content::ToolCalls { .. } => None,
        }
    }

    /// Requested tool calls; empty for text messages.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.content {
            Content::ToolCalls { calls } => calls.as_slice(),
            Content::Text { .. } => &[],
        }
    }

    pub fn is_summary(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("summary"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_error(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("is_error"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Approximate character length used for token estimation.
    pub fn char_len(&self) -> usize {
        match &self.content {
            Content::Text { text } => text.len(),
            Content::ToolCalls { calls } => calls
                .iter()
                .map(|c| c.name.len() + c.args.to_string().len())
                .sum(),
        }
    }

    /// Validate schema version.
    pub fn validate_version(&self) -> Result<(), String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "Schema version mismatch: expected {}, got {}",
                SCHEMA_VERSION, self.schema_version
            ));
        }
        Ok(())
    }
}

/// Structured response from a chat model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    Final { content: String },
    ToolCalls { calls: Vec<ToolCall> },
}

/// Opaque identifier of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random thread id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Checkpointed state of one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    /// Tool calls executed over the whole thread.
    #[serde(default)]
    pub tool_call_count: usize,
    /// Set once the thread-wide tool budget is spent.
    #[serde(default)]
    pub tools_disabled: bool,
}

impl ConversationState {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}
