//! Wayfarer Runtime Core
//!
//! Agent execution core for streaming chat: provider resolution, tool dispatch,
//! turn-level middleware and per-thread checkpointing.

pub mod types;
pub mod error;
pub mod events;
pub mod model;
pub mod llm_client;
pub mod registry;
pub mod tools;
pub mod web_search;
pub mod middleware;
pub mod checkpoint;
pub mod agent_config;
pub mod agent;
pub mod session;
pub mod config;
pub mod flows;
pub mod metrics;

pub use types::{ConversationState, Content, LLMResponse, Message, Role, ThreadId, ToolCall, SCHEMA_VERSION};
pub use error::{AgentError, CheckpointError, ConfigError, ModelError, ToolError};
pub use events::{Diagnostic, FailureKind, LimitScope, Node, Payload, StreamEvent};
pub use model::{ChatModel, ModelHandle, ModelRequest};
pub use llm_client::LLMClient;
pub use registry::ProviderRegistry;
pub use tools::{ToolHandler, ToolSet, ToolSpec};
pub use middleware::{
    MiddlewarePipeline, MiddlewareSettings, ModelFallback, ModelFallbackSettings, ModelReply,
    Policy, SummarizationSettings, Summarizer, ToolCallLimitSettings, ToolCallLimiter,
    TurnContext, Verdict,
};
pub use checkpoint::{CheckpointStore, TurnGuard, TurnPolicy};
pub use agent_config::AgentConfig;
pub use agent::{AgentBuilder, AgentRuntime, RuntimeSettings, TurnOutcome, TurnPhase, TurnStream};
pub use session::{ChatSession, ToolInvocation, TranscriptEntry};
pub use web_search::WebSearch;
pub use config::{AppConfig, FlowInstructions, ProviderConfig};
