//! One user-facing conversation and its transcript.

use crate::agent::{AgentBuilder, AgentRuntime, RuntimeSettings};
use crate::agent_config::AgentConfig;
use crate::checkpoint::CheckpointStore;
use crate::error::AgentError;
use crate::events::{Diagnostic, Node, Payload, StreamEvent};
use crate::registry::ProviderRegistry;
use crate::types::{ConversationState, ThreadId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A tool call paired with its result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub input: serde_json::Value,
    /// `None` if the turn ended before the tool answered.
    pub output: Option<String>,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User { text: String },
    Assistant { text: String },
    ToolInvocation(ToolInvocation),
    /// Summaries, fallbacks, limiter refusals.
    Notice { text: String },
    /// The turn failed; `retryable` drives the retry prompt.
    Failed { message: String, retryable: bool },
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptEntry::User { text } => write!(f, "user: {}", text),
            TranscriptEntry::Assistant { text } => write!(f, "assistant: {}", text),
            TranscriptEntry::ToolInvocation(inv) => {
                write!(f, "Tool[{}] invoked with input: {}", inv.name, inv.input)
            }
            TranscriptEntry::Notice { text } => write!(f, "note: {}", text),
            TranscriptEntry::Failed { message, retryable } => {
                if *retryable {
                    write!(f, "error: {} (you can retry)", message)
                } else {
                    write!(f, "error: {}", message)
                }
            }
        }
    }
}

/// Owns a thread id, the selected agent config and a lazily built runtime.
pub struct ChatSession {
    thread_id: ThreadId,
    config: AgentConfig,
    registry: Arc<ProviderRegistry>,
    store: Arc<CheckpointStore>,
    settings: RuntimeSettings,
    runtime: Option<AgentRuntime>,
    transcript: Vec<TranscriptEntry>,
    pending: Vec<ToolInvocation>,
}

impl ChatSession {
    pub fn new(
        config: AgentConfig,
        registry: Arc<ProviderRegistry>,
        store: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            thread_id: ThreadId::generate(),
            config,
            registry,
            store,
            settings: RuntimeSettings::default(),
            runtime: None,
            transcript: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self.runtime = None;
        self
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Checkpointed state of this session's thread.
    pub fn state(&self) -> ConversationState {
        self.store.load(&self.thread_id)
    }

    /// Swap the agent config. The next turn builds a fresh runtime; history
    /// on the thread is kept.
    pub fn reconfigure(&mut self, config: AgentConfig) {
        info!(
            thread_id = %self.thread_id,
            model = %config.model_ref(),
            "session reconfigured"
        );
        self.config = config;
        self.runtime = None;
    }

    /// Start a new conversation on a fresh thread.
    pub fn reset(&mut self) {
        self.thread_id = ThreadId::generate();
        self.transcript.clear();
        self.pending.clear();
    }

    /// Cached runtime, built on first use.
    pub fn runtime(&mut self) -> Result<&AgentRuntime, AgentError> {
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => {
                let runtime = AgentBuilder::new(self.config.clone(), Arc::clone(&self.registry))
                    .checkpointer(Arc::clone(&self.store))
                    .settings(self.settings.clone())
                    .build()?;
                debug!(thread_id = %self.thread_id, model = %runtime.model_id(), "runtime built");
                runtime
            }
        };
        Ok(self.runtime.insert(runtime))
    }

    /// Run one turn, reporting each transcript entry as it arrives.
    pub async fn submit<F>(&mut self, text: &str, mut on_entry: F) -> Result<(), AgentError>
    where
        F: FnMut(&TranscriptEntry),
    {
        let runtime = self.runtime()?.clone();

        let mut stream = match runtime.stream(text, &self.thread_id).await {
            Ok(stream) => stream,
            Err(err) => {
                self.push(
                    TranscriptEntry::Failed {
                        message: err.to_string(),
                        retryable: err.is_retryable(),
                    },
                    &mut on_entry,
                );
                return Err(err);
            }
        };

        self.push(
            TranscriptEntry::User {
                text: text.to_string(),
            },
            &mut on_entry,
        );

        while let Some(event) = stream.next_event().await {
            if let Some(entry) = self.absorb(event) {
                self.push(entry, &mut on_entry);
            }
        }

        for open in std::mem::take(&mut self.pending) {
            self.push(TranscriptEntry::ToolInvocation(open), &mut on_entry);
        }

        stream.finish().await
    }

    pub async fn send(&mut self, text: &str) -> Result<(), AgentError> {
        self.submit(text, |_| {}).await
    }

    fn push<F>(&mut self, entry: TranscriptEntry, on_entry: &mut F)
    where
        F: FnMut(&TranscriptEntry),
    {
        on_entry(&entry);
        self.transcript.push(entry);
    }

    /// Classify one event. Tool requests open pending invocations and
    /// produce no entry until their result arrives.
    fn absorb(&mut self, event: StreamEvent) -> Option<TranscriptEntry> {
        match event.payload {
            Payload::Message(message) => match event.node {
                Node::Model => {
                    let calls = message.tool_calls();
                    if calls.is_empty() {
                        return message.as_text().map(|text| TranscriptEntry::Assistant {
                            text: text.to_string(),
                        });
                    }
                    self.pending.extend(calls.iter().map(|call| ToolInvocation {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.args.clone(),
                        output: None,
                        is_error: false,
                    }));
                    None
                }
                Node::Tool => {
                    let output = message.as_text().unwrap_or_default().to_string();
                    let position = self
                        .pending
                        .iter()
                        .position(|p| Some(&p.call_id) == message.tool_call_id.as_ref());
                    let mut invocation = match position {
                        Some(i) => self.pending.remove(i),
                        None => ToolInvocation {
                            call_id: message.tool_call_id.clone().unwrap_or_default(),
                            name: message.name.clone().unwrap_or_default(),
                            input: serde_json::Value::Null,
                            output: None,
                            is_error: false,
                        },
                    };
                    invocation.output = Some(output);
                    invocation.is_error = message.is_error();
                    Some(TranscriptEntry::ToolInvocation(invocation))
                }
                Node::Summarizer | Node::Fallback => {
                    message.as_text().map(|text| TranscriptEntry::Notice {
                        text: text.to_string(),
                    })
                }
            },
            Payload::Diagnostic(diagnostic) => match diagnostic {
                Diagnostic::Failed {
                    message, retryable, ..
                } => Some(TranscriptEntry::Failed { message, retryable }),
                Diagnostic::ToolLimitReached { ref tool, .. } => {
                    if let Some(i) = self.pending.iter().position(|p| &p.name == tool) {
                        self.pending.remove(i);
                    }
                    Some(TranscriptEntry::Notice {
                        text: diagnostic.to_string(),
                    })
                }
                Diagnostic::Summarized { .. } | Diagnostic::FallbackEngaged { .. } => {
                    Some(TranscriptEntry::Notice {
                        text: diagnostic.to_string(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::events::{FailureKind, LimitScope};
    use crate::types::{Message, ToolCall};
    use serde_json::json;

    fn session() -> ChatSession {
        ChatSession::new(
            AgentConfig::new("mock", "m", ""),
            Arc::new(ProviderRegistry::new()),
            Arc::new(CheckpointStore::default()),
        )
    }

    #[test]
    fn test_tool_request_and_result_fold_into_one_entry() {
        let mut s = session();
        let call = ToolCall::with_id("c1", "web_search", json!({"query": "tokyo"}));
        let request = StreamEvent::message(Node::Model, Message::tool_request(vec![call.clone()]));
        assert!(s.absorb(request).is_none());

        let result = StreamEvent::message(Node::Tool, Message::tool_result(&call, "sunny", false));
        match s.absorb(result).unwrap() {
            TranscriptEntry::ToolInvocation(inv) => {
                assert_eq!(inv.name, "web_search");
                assert_eq!(inv.input, json!({"query": "tokyo"}));
                assert_eq!(inv.output.as_deref(), Some("sunny"));
                assert!(!inv.is_error);
            }
            other => panic!("unexpected entry {:?}", other),
        }
        assert!(s.pending.is_empty());
    }

    #[test]
    fn test_refusal_closes_pending() {
        let mut s = session();
        let call = ToolCall::with_id("c1", "web_search", json!({}));
        s.absorb(StreamEvent::message(Node::Model, Message::tool_request(vec![call])));
        let entry = s
            .absorb(StreamEvent::diagnostic(
                Node::Tool,
                Diagnostic::ToolLimitReached {
                    scope: LimitScope::Run,
                    limit: 2,
                    tool: "web_search".to_string(),
                },
            ))
            .unwrap();
        assert!(matches!(entry, TranscriptEntry::Notice { .. }));
        assert!(s.pending.is_empty());
    }

    #[test]
    fn test_failure_entry() {
        let mut s = session();
        let entry = s
            .absorb(StreamEvent::diagnostic(
                Node::Model,
                Diagnostic::Failed {
                    kind: FailureKind::ModelUnavailable,
                    message: "Model unavailable: down".to_string(),
                    retryable: true,
                },
            ))
            .unwrap();
        assert_eq!(
            entry,
            TranscriptEntry::Failed {
                message: "Model unavailable: down".to_string(),
                retryable: true
            }
        );
    }

    #[test]
    fn test_tool_entry_display() {
        let entry = TranscriptEntry::ToolInvocation(ToolInvocation {
            call_id: "c1".to_string(),
            name: "web_search".to_string(),
            input: json!({"query": "tokyo"}),
            output: Some("sunny".to_string()),
            is_error: false,
        });
        assert_eq!(
            entry.to_string(),
            r#"Tool[web_search] invoked with input: {"query":"tokyo"}"#
        );
    }

    #[tokio::test]
    async fn test_unknown_model_is_configuration_error() {
        let mut s = session();
        let err = s.send("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert!(s.transcript().is_empty());
    }

    #[test]
    fn test_reset_changes_thread() {
        let mut s = session().with_thread_id(ThreadId::from("fixed"));
        assert_eq!(s.thread_id().as_str(), "fixed");
        s.reset();
        assert_ne!(s.thread_id().as_str(), "fixed");
    }
}
