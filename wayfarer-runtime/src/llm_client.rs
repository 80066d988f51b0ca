//! LLM client for OpenAI-compatible chat completion endpoints.

use crate::error::ModelError;
use crate::metrics::{Histogram, MetricTimer};
use crate::model::{ChatModel, ModelRequest};
use crate::types::{Content, LLMResponse, Message, Role, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible request format.
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// OpenAI-compatible response format.
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

/// Chat model backed by an OpenAI-compatible HTTP API (Groq, Gemini, OpenAI).
#[derive(Clone)]
pub struct LLMClient {
    id: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LLMClient {
    /// Create a new LLM client.
    ///
    /// # Arguments
    /// * `provider` - Provider id, used for the qualified model id
    /// * `base_url` - Base URL of the OpenAI-compatible API
    /// * `model` - Model name sent with every request
    pub fn new(provider: &str, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let model = model.into();

        Self {
            id: format!("{}:{}", provider, model),
            base_url: base_url.into(),
            model,
            api_key: None,
            client,
        }
    }

    /// Attach a bearer API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &ModelRequest) -> OpenAIRequest {
        let mut openai_messages = Vec::with_capacity(request.messages.len() + 1);

        if !request.system_prompt.is_empty() {
            openai_messages.push(serde_json::json!({
                "role": "system",
                "content": request.system_prompt
            }));
        }

        for msg in &request.messages {
            openai_messages.push(encode_message(msg));
        }

        let has_tools = !request.tools.is_empty();
        OpenAIRequest {
            model: self.model.clone(),
            messages: openai_messages,
            tools: has_tools.then(|| request.tools.clone()),
            tool_choice: has_tools.then(|| "auto".to_string()),
            temperature: Some(0.2),
        }
    }
}

/// Encode one message in strict OpenAI wire format.
fn encode_message(msg: &Message) -> serde_json::Value {
    match (&msg.role, &msg.content) {
        (Role::Assistant, Content::ToolCalls { calls }) => {
            let tool_calls: Vec<serde_json::Value> = calls
                .iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.args.to_string()
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": serde_json::Value::Null,
                "tool_calls": tool_calls
            })
        }
        (Role::Tool, _) => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.as_text().unwrap_or_default()
        }),
        (role, _) => {
            let role_str = match role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::System => "system",
            };
            serde_json::json!({
                "role": role_str,
                "content": msg.as_text().unwrap_or_default()
            })
        }
    }
}

/// Map an HTTP status to a model error kind.
fn classify_status(status: u16, body: String) -> ModelError {
    match status {
        401 | 403 => ModelError::Rejected(format!("Authentication failed. Details: {}", body)),
        404 => ModelError::Rejected(format!("Invalid endpoint or model (404). Details: {}", body)),
        408 | 504 => ModelError::Timeout(format!("Gateway timeout ({}). Details: {}", status, body)),
        429 => ModelError::RateLimited(body),
        500..=599 => ModelError::Unavailable(format!("Server error {}. Details: {}", status, body)),
        _ => ModelError::Rejected(format!("HTTP error {}. Details: {}", status, body)),
    }
}

/// Parse tool-call arguments. An empty string means no arguments.
fn decode_arguments(name: &str, raw: &str) -> Result<serde_json::Value, ModelError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| {
        ModelError::Malformed(format!(
            "Tool call '{}' has invalid JSON arguments ({}): {}",
            name, e, raw
        ))
    })
}

/// Normalize an OpenAI response into an `LLMResponse`.
fn decode_response(response: OpenAIResponse) -> Result<LLMResponse, ModelError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Malformed("No choices in response".to_string()))?;

    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let args = decode_arguments(&tc.function.name, &tc.function.arguments)?;
            Ok(match tc.id {
                Some(id) if !id.is_empty() => ToolCall::with_id(id, tc.function.name, args),
                _ => ToolCall::new(tc.function.name, args),
            })
        })
        .collect::<Result<_, ModelError>>()?;

    if !calls.is_empty() {
        if calls.iter().any(|c| c.name.is_empty()) {
            return Err(ModelError::Malformed("Tool call missing name".to_string()));
        }
        return Ok(LLMResponse::ToolCalls { calls });
    }

    let content = choice.message.content.unwrap_or_default();
    if content.is_empty() {
        return Err(ModelError::Malformed(
            "Final response has empty content".to_string(),
        ));
    }
    Ok(LLMResponse::Final { content })
}

#[async_trait]
impl ChatModel for LLMClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<LLMResponse, ModelError> {
        let _timer = MetricTimer::new(Histogram::ModelLatency);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = self.build_request(request);

        debug!(model = %self.id, url = %url, tools = request.tools.len(), "llm request");

        let mut req_builder = self.client.post(&url).json(&payload);
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else if e.is_connect() {
                ModelError::Unavailable(format!("Network connection failed: {}", e))
            } else {
                ModelError::Unavailable(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(classify_status(status.as_u16(), error_body));
        }

        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("Failed to parse response: {}", e)))?;

        decode_response(parsed)
    }
}
