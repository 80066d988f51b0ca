#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Shared mocks for integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wayfarer_runtime::*;

/// Chat model that replays a fixed script and records every request.
pub struct ScriptedModel {
    id: String,
    script: Mutex<VecDeque<Result<LLMResponse, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(id: &str, script: Vec<Result<LLMResponse, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn slow(id: &str, script: Vec<Result<LLMResponse, ModelError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<LLMResponse, ModelError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Err(ModelError::Malformed("script exhausted".to_string())))
    }
}

pub fn answer(text: &str) -> Result<LLMResponse, ModelError> {
    Ok(LLMResponse::Final {
        content: text.to_string(),
    })
}

pub fn call(name: &str, args: serde_json::Value) -> Result<LLMResponse, ModelError> {
    Ok(LLMResponse::ToolCalls {
        calls: vec![ToolCall::new(name, args)],
    })
}

pub fn calls(name: &str, n: usize) -> Result<LLMResponse, ModelError> {
    Ok(LLMResponse::ToolCalls {
        calls: (0..n)
            .map(|i| ToolCall::new(name, json!({"query": format!("q{}", i)})))
            .collect(),
    })
}

/// Registry with one provider per `provider:model` id, each serving the given model.
pub fn registry(models: &[Arc<ScriptedModel>]) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for model in models {
        let (provider, name) = model.id.split_once(':').unwrap();
        let handle: ModelHandle = model.clone();
        registry.register(provider, vec![name.to_string()], move |_: &str| {
            Ok(Arc::clone(&handle))
        });
    }
    Arc::new(registry)
}

/// `web_search` stand-in that counts invocations.
pub fn fake_search(counter: Arc<AtomicUsize>) -> ToolSpec {
    ToolSpec::from_fn(
        "web_search",
        "Search the web",
        wayfarer_runtime::web_search::parameters_schema(),
        move |args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let query = args["query"].as_str().unwrap_or_default().to_string();
                Ok(format!("Results for {}: 18°C and clear", query))
            }
        },
    )
}

pub fn limits(thread_limit: Option<usize>, run_limit: Option<usize>) -> MiddlewareSettings {
    MiddlewareSettings {
        tool_call_limit: Some(ToolCallLimitSettings {
            enabled: true,
            thread_limit,
            run_limit,
        }),
        ..Default::default()
    }
}
