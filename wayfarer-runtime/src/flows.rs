//! Single-shot flows that bypass the agent loop.

use crate::error::AgentError;
use crate::model::{ModelHandle, ModelRequest};
use crate::types::{LLMResponse, Message};
use tracing::{debug, error};

/// Prompt used by the text summarizer flow.
pub fn summarize_prompt(instruction: &str, text: &str) -> String {
    format!("{}\n\nSummarize the following text:\n{}", instruction, text)
}

/// Summarize `text` with one model call. No tools, no checkpoint.
pub async fn summarize_text(
    model: &ModelHandle,
    instruction: &str,
    text: &str,
) -> Result<String, AgentError> {
    let request = ModelRequest {
        system_prompt: String::new(),
        messages: vec![Message::user(summarize_prompt(instruction, text))],
        tools: Vec::new(),
    };
    debug!(model = %model.id(), chars = text.len(), "summarizing text");

    match model.invoke(&request).await {
        Ok(LLMResponse::Final { content }) => Ok(content),
        Ok(LLMResponse::ToolCalls { .. }) => Err(AgentError::ModelUnavailable(format!(
            "{} requested tools in a tool-free request",
            model.id()
        ))),
        Err(e) => {
            error!(model = %model.id(), error = %e, "summarization failed");
            Err(AgentError::ModelUnavailable(format!("{}: {}", model.id(), e)))
        }
    }
}
