//! Chat model abstraction.

use crate::error::ModelError;
use crate::types::{LLMResponse, Message};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a model needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// Tool schemas in OpenAI function format. Empty disables tool use.
    pub tools: Vec<serde_json::Value>,
}

/// A callable chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Qualified id, `provider:model`.
    fn id(&self) -> &str;

    /// Run one completion and return the whole response.
    async fn invoke(&self, request: &ModelRequest) -> Result<LLMResponse, ModelError>;
}

/// Shared handle to a resolved model.
pub type ModelHandle = Arc<dyn ChatModel>;
