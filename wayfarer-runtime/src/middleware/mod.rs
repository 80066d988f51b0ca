//! Turn-level policies applied around model and tool steps.
//!
//! Policies run in a fixed order: tool-call limiting, then summarization,
//! then model fallback. The pipeline normalizes to this order regardless of
//! how it was configured.

mod fallback;
mod limiter;
mod summarizer;

pub use fallback::{ModelFallback, ModelReply};
pub use limiter::{ToolCallLimiter, Verdict};
pub use summarizer::{estimate_tokens, Summarizer, DEFAULT_SUMMARY_PROMPT};

use crate::error::{AgentError, ConfigError};
use crate::events::Diagnostic;
use crate::model::{ModelHandle, ModelRequest};
use crate::registry::ProviderRegistry;
use crate::types::ConversationState;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const DEFAULT_SUMMARY_MODEL: &str = "groq:llama-3.3-70b-versatile";
pub const DEFAULT_FALLBACK_MODEL: &str = "google_genai:gemini-2.5-flash-lite";

fn enabled() -> bool {
    true
}

/// Per-turn mutable policy state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnContext {
    /// Tool calls executed in this turn.
    pub run_tool_calls: usize,
    /// Set once fallback engaged; later model calls go to the secondary.
    pub on_secondary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallLimitSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub thread_limit: Option<usize>,
    #[serde(default)]
    pub run_limit: Option<usize>,
}

impl Default for ToolCallLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            thread_limit: Some(6),
            run_limit: Some(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummarizationSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// `provider:model` used to write summaries.
    #[serde(default = "default_summary_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_before_summary: usize,
    #[serde(default = "default_messages_to_keep")]
    pub messages_to_keep: usize,
    #[serde(default)]
    pub summary_prompt: Option<String>,
}

fn default_summary_model() -> String {
    DEFAULT_SUMMARY_MODEL.to_string()
}

fn default_max_tokens() -> usize {
    4000
}

fn default_messages_to_keep() -> usize {
    20
}

impl Default for SummarizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_summary_model(),
            max_tokens_before_summary: default_max_tokens(),
            messages_to_keep: default_messages_to_keep(),
            summary_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFallbackSettings {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// `provider:model` tried once when the primary fails.
    #[serde(default = "default_fallback_model")]
    pub model: String,
}

fn default_fallback_model() -> String {
    DEFAULT_FALLBACK_MODEL.to_string()
}

impl Default for ModelFallbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_fallback_model(),
        }
    }
}

/// Middleware section of the config, keyed by policy name.
///
/// An absent section means the policy is not installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MiddlewareSettings {
    #[serde(default)]
    pub tool_call_limit: Option<ToolCallLimitSettings>,
    #[serde(default)]
    pub summarization: Option<SummarizationSettings>,
    #[serde(default)]
    pub model_fallback: Option<ModelFallbackSettings>,
}

impl MiddlewareSettings {
    /// All three policies with the travel agent's stock values.
    pub fn recommended() -> Self {
        Self {
            tool_call_limit: Some(ToolCallLimitSettings::default()),
            summarization: Some(SummarizationSettings::default()),
            model_fallback: Some(ModelFallbackSettings::default()),
        }
    }

    /// Check values that do not need a registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limits) = self.tool_call_limit.as_ref().filter(|s| s.enabled) {
            if limits.thread_limit == Some(0) || limits.run_limit == Some(0) {
                return Err(ConfigError::Invalid(
                    "tool_call_limit limits must be at least 1".to_string(),
                ));
            }
        }
        if let Some(summary) = self.summarization.as_ref().filter(|s| s.enabled) {
            if summary.messages_to_keep == 0 {
                return Err(ConfigError::Invalid(
                    "summarization.messages_to_keep must be at least 1".to_string(),
                ));
            }
            crate::registry::split_model_ref(&summary.model)?;
        }
        if let Some(fallback) = self.model_fallback.as_ref().filter(|s| s.enabled) {
            crate::registry::split_model_ref(&fallback.model)?;
        }
        Ok(())
    }
}

/// One installed policy.
pub enum Policy {
    ToolCallLimiter(ToolCallLimiter),
    Summarizer(Summarizer),
    ModelFallback(ModelFallback),
}

impl Policy {
    fn rank(&self) -> u8 {
        match self {
            Policy::ToolCallLimiter(_) => 0,
            Policy::Summarizer(_) => 1,
            Policy::ModelFallback(_) => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::ToolCallLimiter(_) => "tool_call_limit",
            Policy::Summarizer(_) => "summarization",
            Policy::ModelFallback(_) => "model_fallback",
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered, duplicate-free set of policies.
#[derive(Debug, Default)]
pub struct MiddlewarePipeline {
    policies: Vec<Policy>,
}

impl MiddlewarePipeline {
    pub fn new(mut policies: Vec<Policy>) -> Result<Self, ConfigError> {
        policies.sort_by_key(Policy::rank);
        if let Some(pair) = policies.windows(2).find(|w| w[0].rank() == w[1].rank()) {
            return Err(ConfigError::Invalid(format!(
                "middleware policy '{}' configured more than once",
                pair[0].name()
            )));
        }
        Ok(Self { policies })
    }

    /// Build from settings, resolving summary and fallback models.
    pub fn from_settings(
        settings: &MiddlewareSettings,
        registry: &ProviderRegistry,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let mut policies = Vec::new();

        if let Some(s) = settings.tool_call_limit.as_ref().filter(|s| s.enabled) {
            policies.push(Policy::ToolCallLimiter(ToolCallLimiter::new(
                s.thread_limit,
                s.run_limit,
            )));
        }
        if let Some(s) = settings.summarization.as_ref().filter(|s| s.enabled) {
            let model = registry.resolve_qualified(&s.model)?;
            let mut summarizer =
                Summarizer::new(model, s.max_tokens_before_summary, s.messages_to_keep)?;
            if let Some(prompt) = s.summary_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
                summarizer = summarizer.with_prompt(prompt);
            }
            policies.push(Policy::Summarizer(summarizer));
        }
        if let Some(s) = settings.model_fallback.as_ref().filter(|s| s.enabled) {
            let model = registry.resolve_qualified(&s.model)?;
            policies.push(Policy::ModelFallback(ModelFallback::new(model)));
        }

        let pipeline = Self::new(policies)?;
        debug!(policies = ?pipeline.names(), "middleware pipeline built");
        Ok(pipeline)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(Policy::name).collect()
    }

    pub fn limiter(&self) -> Option<&ToolCallLimiter> {
        self.policies.iter().find_map(|p| match p {
            Policy::ToolCallLimiter(l) => Some(l),
            _ => None,
        })
    }

    pub fn summarizer(&self) -> Option<&Summarizer> {
        self.policies.iter().find_map(|p| match p {
            Policy::Summarizer(s) => Some(s),
            _ => None,
        })
    }

    pub fn fallback(&self) -> Option<&ModelFallback> {
        self.policies.iter().find_map(|p| match p {
            Policy::ModelFallback(f) => Some(f),
            _ => None,
        })
    }

    /// Whether tool schemas may be offered to the model.
    pub fn tools_enabled(&self, state: &ConversationState) -> bool {
        self.limiter().map_or(true, |l| !l.thread_exhausted(state))
    }

    /// Decide whether the next tool call may run.
    pub fn check_tool_call(&self, state: &ConversationState, ctx: &TurnContext) -> Verdict {
        self.limiter()
            .map_or(Verdict::Allow, |l| l.check(state, ctx))
    }

    /// Compact history before a model call, if configured and needed.
    pub async fn before_model(&self, state: &mut ConversationState) -> Option<Diagnostic> {
        match self.summarizer() {
            Some(summarizer) => summarizer.compact(&mut state.messages).await,
            None => None,
        }
    }

    /// Call the model for one step, applying fallback.
    pub async fn call_model(
        &self,
        primary: &ModelHandle,
        request: &ModelRequest,
        ctx: &mut TurnContext,
    ) -> Result<ModelReply, AgentError> {
        fallback::call_with_fallback(self.fallback(), primary, request, ctx).await
    }
}
