//! `web_search` tool backed by the Tavily search API.

use crate::error::ToolError;
use crate::tools::{ToolHandler, ToolSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const TOOL_NAME: &str = "web_search";
pub const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;
const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const API_KEY_ENV: &str = "TAVILY_API_KEY";

pub struct WebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl WebSearch {
    /// Read the API key from `TAVILY_API_KEY`. A missing key surfaces as a
    /// tool error on first use, not at construction.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Self::with_endpoint(TAVILY_SEARCH_URL, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Wrap as a tool spec for an agent.
    pub fn into_tool(self) -> ToolSpec {
        ToolSpec::new(
            TOOL_NAME,
            "Search the web for up-to-date information such as weather, events, \
             travel advisories, and destination facts.",
            parameters_schema(),
            Arc::new(self),
        )
    }
}

pub fn parameters_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "The search query."},
            "limit": {
                "type": "integer",
                "description": "The maximum number of results to return.",
                "default": DEFAULT_LIMIT
            }
        },
        "required": ["query"]
    })
}

/// Validate arguments into `(query, limit)`.
fn parse_args(args: &Value) -> Result<(String, usize), ToolError> {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| {
            ToolError::InvalidArguments("missing required string field `query`".to_string())
        })?;

    let limit = match args.get("limit") {
        None | Some(Value::Null) => DEFAULT_LIMIT,
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| (n as usize).min(MAX_LIMIT))
            .ok_or_else(|| {
                ToolError::InvalidArguments("`limit` must be a positive integer".to_string())
            })?,
    };

    Ok((query.to_string(), limit))
}

/// Reduce a Tavily response to the fields the model needs.
fn format_results(query: &str, body: &Value, limit: usize) -> String {
    let results: Vec<Value> = body
        .get("results")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .take(limit)
                .map(|item| {
                    json!({
                        "title": item.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                        "url": item.get("url").and_then(|v| v.as_str()).unwrap_or(""),
                        "content": item.get("content").and_then(|v| v.as_str()).unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let mut out = json!({ "query": query, "results": results });
    if let Some(answer) = body.get("answer").and_then(|v| v.as_str()) {
        out["answer"] = json!(answer);
    }
    out.to_string()
}

#[async_trait]
impl ToolHandler for WebSearch {
    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let (query, limit) = parse_args(&args)?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ToolError::Execution(format!("{} environment variable is not set", API_KEY_ENV))
        })?;

        debug!(query = %query, limit, "performing web search");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": api_key,
                "query": query,
                "max_results": limit,
            }))
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("search request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ToolError::Execution(format!(
                "search returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to parse search response: {}", e)))?;

        Ok(format_results(&query, &body, limit))
    }
}
