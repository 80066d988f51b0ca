//! Tool declarations handed to the agent.

use crate::error::{ConfigError, ToolError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Executes one tool with model-supplied JSON arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError>;
}

type BoxedToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> BoxedToolFuture + Send + Sync,
{
    async fn invoke(&self, args: serde_json::Value) -> Result<String, ToolError> {
        (self.0)(args).await
    }
}

/// A named tool: description, JSON-schema parameters, and handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// Build a tool from an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        f: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let handler = FnHandler(move |args| -> BoxedToolFuture { Box::pin(f(args)) });
        Self::new(name, description, parameters, Arc::new(handler))
    }

    /// Schema in OpenAI function-calling format.
    pub fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Tools available to one agent, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    pub fn new(tools: Vec<ToolSpec>) -> Result<Self, ConfigError> {
        let mut set = Self::default();
        for tool in tools {
            set.register(tool)?;
        }
        Ok(set)
    }

    pub fn register(&mut self, tool: ToolSpec) -> Result<(), ConfigError> {
        if tool.name.is_empty() {
            return Err(ConfigError::Invalid("tool name must not be empty".to_string()));
        }
        if self.index.contains_key(&tool.name) {
            return Err(ConfigError::Invalid(format!(
                "duplicate tool name '{}'",
                tool.name
            )));
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn schemas(&self) -> Vec<serde_json::Value> {
        self.tools.iter().map(ToolSpec::schema).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> ToolSpec {
        ToolSpec::from_fn(
            "echo",
            "Echo the input",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) },
        )
    }

    #[tokio::test]
    async fn test_from_fn_invokes_closure() {
        let tool = echo();
        let out = tool.handler.invoke(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }

    #[test]
    fn test_schema_format() {
        let schema = echo().schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "echo");
        assert_eq!(schema["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolSet::new(vec![echo(), echo()]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_lookup_and_order() {
        let other = ToolSpec::from_fn("web_search", "Search", json!({}), |_| async {
            Ok(String::new())
        });
        let set = ToolSet::new(vec![other, echo()]).unwrap();
        assert_eq!(set.names(), vec!["web_search", "echo"]);
        assert!(set.get("echo").is_some());
        assert!(set.get("missing").is_none());
        assert_eq!(set.schemas().len(), 2);
    }
}
