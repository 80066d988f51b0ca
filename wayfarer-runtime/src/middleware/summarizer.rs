use crate::error::ConfigError;
use crate::events::Diagnostic;
use crate::model::{ModelHandle, ModelRequest};
use crate::types::{Content, LLMResponse, Message, Role};
use tracing::{debug, info, warn};

/// Used when no summary prompt is configured.
pub const DEFAULT_SUMMARY_PROMPT: &str = "You are condensing the earlier part of a conversation \
between a user and a travel assistant. Write a concise summary that keeps every fact, \
preference, destination, date and open question needed to continue the conversation. \
Respond with the summary only.";

const MESSAGES_PLACEHOLDER: &str = "{messages}";

/// Estimate token count using simple length-based heuristic (4 characters per token).
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum::<usize>() / 4
}

/// Replaces older history with one summary message once it grows too large.
pub struct Summarizer {
    model: ModelHandle,
    max_tokens_before_summary: usize,
    messages_to_keep: usize,
    prompt: String,
}

impl Summarizer {
    /// # Arguments
    /// * `model` - Model that writes summaries
    /// * `max_tokens_before_summary` - Estimated token count that triggers compaction
    /// * `messages_to_keep` - Most recent messages kept verbatim, at least 1
    pub fn new(
        model: ModelHandle,
        max_tokens_before_summary: usize,
        messages_to_keep: usize,
    ) -> Result<Self, ConfigError> {
        if messages_to_keep == 0 {
            return Err(ConfigError::Invalid(
                "messages_to_keep must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            model,
            max_tokens_before_summary,
            messages_to_keep,
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        })
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn model_id(&self) -> &str {
        self.model.id()
    }

    /// Index where the kept window starts, or `None` if nothing should be replaced.
    fn cutoff(&self, messages: &[Message]) -> Option<usize> {
        let mut cutoff = messages.len().checked_sub(self.messages_to_keep)?;
        while cutoff > 0 && messages[cutoff].role == Role::Tool {
            cutoff -= 1;
        }
        if cutoff == 0 || messages[..cutoff].iter().all(Message::is_summary) {
            return None;
        }
        Some(cutoff)
    }

    /// Compact `messages` in place. Returns a diagnostic when history was replaced.
    ///
    /// A failing summary model leaves history untouched.
    pub async fn compact(&self, messages: &mut Vec<Message>) -> Option<Diagnostic> {
        let token_count = estimate_tokens(messages);
        if token_count <= self.max_tokens_before_summary {
            debug!(
                "Token count {} below threshold {}, no compaction needed",
                token_count, self.max_tokens_before_summary
            );
            return None;
        }

        let Some(cutoff) = self.cutoff(messages) else {
            debug!("Nothing older than the kept window to summarize");
            return None;
        };

        info!(
            "Token count {} exceeds threshold {}, compacting {} messages",
            token_count, self.max_tokens_before_summary, cutoff
        );

        let request = self.build_request(&messages[..cutoff]);
        let summary = match self.model.invoke(&request).await {
            Ok(LLMResponse::Final { content }) if !content.trim().is_empty() => content,
            Ok(_) => {
                warn!(model = %self.model.id(), "Summary model returned no text, skipping compaction");
                return None;
            }
            Err(e) => {
                warn!(model = %self.model.id(), error = %e, "Summary model failed, skipping compaction");
                return None;
            }
        };

        let recent = messages.split_off(cutoff);
        let kept = recent.len();
        messages.clear();
        messages.push(Message::summary(summary, cutoff));
        messages.extend(recent);
        crate::metrics::increment(crate::metrics::Counter::Compactions);

        info!("Compacted {} messages into one summary, {} kept", cutoff, kept);
        Some(Diagnostic::Summarized {
            replaced: cutoff,
            kept,
        })
    }

    fn build_request(&self, older: &[Message]) -> ModelRequest {
        let transcript = render_transcript(older);
        let (system_prompt, body) = if self.prompt.contains(MESSAGES_PLACEHOLDER) {
            (
                String::new(),
                self.prompt.replace(MESSAGES_PLACEHOLDER, &transcript),
            )
        } else {
            (
                self.prompt.clone(),
                format!("Conversation to summarize:\n{}", transcript),
            )
        };
        ModelRequest {
            system_prompt,
            messages: vec![Message::user(body)],
            tools: Vec::new(),
        }
    }
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => "summary",
            };
            match &m.content {
                Content::Text { text } => format!("{}: {}", label, text),
                Content::ToolCalls { calls } => {
                    let calls: Vec<String> = calls
                        .iter()
                        .map(|c| format!("{}({})", c.name, c.args))
                        .collect();
                    format!("{}: [called {}]", label, calls.join(", "))
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
