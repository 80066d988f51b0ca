//! Agent configuration: model selection, prompt, tools and middleware.

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::middleware::MiddlewareSettings;
use crate::tools::ToolSpec;

/// Everything needed to build one agent runtime. Immutable once built into a
/// runtime; changing it means building a new runtime.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolSpec>,
    pub middleware: MiddlewareSettings,
}

impl AgentConfig {
    /// Config with no tools and no middleware.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            middleware: MiddlewareSettings::default(),
        }
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareSettings) -> Self {
        self.middleware = middleware;
        self
    }

    /// Qualified `provider:model` id of the primary model.
    pub fn model_ref(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }

    /// Build a config for `flow` from the application config.
    ///
    /// # Arguments
    /// * `provider_key` - Key under `models` (case-insensitive)
    /// * `model` - One of the models listed for that key
    ///
    /// # Errors
    /// `UnknownProvider`/`UnknownModel` for a bad selection, `Invalid` for an
    /// unknown flow.
    pub fn from_app_config(
        app: &AppConfig,
        flow: &str,
        provider_key: &str,
        model: &str,
    ) -> Result<Self, ConfigError> {
        let provider = app
            .provider(provider_key)
            .ok_or_else(|| ConfigError::UnknownProvider(provider_key.to_string()))?;
        if !provider.model.iter().any(|m| m == model) {
            return Err(ConfigError::UnknownModel {
                provider: provider_key.to_string(),
                model: model.to_string(),
            });
        }
        let instructions = app
            .flow(flow)
            .ok_or_else(|| ConfigError::Invalid(format!("Unknown flow: {}", flow)))?;

        let mut middleware = app.middleware.clone();
        if let Some(summary) = middleware.summarization.as_mut() {
            if summary.summary_prompt.is_none() {
                summary.summary_prompt = instructions.summarizer_prompt.clone();
            }
        }

        Ok(Self {
            provider: provider.model_provider.clone(),
            model: model.to_string(),
            system_prompt: instructions.system_prompt().to_string(),
            tools: Vec::new(),
            middleware,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::middleware::SummarizationSettings;
    use serde_json::json;

    fn app() -> AppConfig {
        let mut app = AppConfig::from_toml_str(
            r#"
[models.groq]
model = ["llama-3.3-70b-versatile"]
model_provider = "groq"

[instructions.travel_info_agent]
sys_prompt = "You are a travel assistant."
summarizer_prompt = "Keep destinations and dates."
"#,
        )
        .unwrap();
        app.middleware.summarization = Some(SummarizationSettings::default());
        app
    }

    #[test]
    fn test_from_app_config() {
        let config =
            AgentConfig::from_app_config(&app(), "travel_info_agent", "GROQ", "llama-3.3-70b-versatile")
                .unwrap();
        assert_eq!(config.provider, "groq");
        assert_eq!(config.model_ref(), "groq:llama-3.3-70b-versatile");
        assert_eq!(config.system_prompt, "You are a travel assistant.");
        assert_eq!(
            config.middleware.summarization.unwrap().summary_prompt.as_deref(),
            Some("Keep destinations and dates.")
        );
    }

    #[test]
    fn test_bad_selection() {
        assert!(matches!(
            AgentConfig::from_app_config(&app(), "travel_info_agent", "acme", "x"),
            Err(ConfigError::UnknownProvider(_))
        ));
        assert!(matches!(
            AgentConfig::from_app_config(&app(), "travel_info_agent", "groq", "gpt-9"),
            Err(ConfigError::UnknownModel { .. })
        ));
        assert!(matches!(
            AgentConfig::from_app_config(&app(), "nope", "groq", "llama-3.3-70b-versatile"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_with_tool() {
        let tool = ToolSpec::from_fn("echo", "Echo", json!({}), |_| async { Ok(String::new()) });
        let config = AgentConfig::new("groq", "llama", "sys").with_tool(tool);
        assert_eq!(config.tools.len(), 1);
        assert!(config.middleware.tool_call_limit.is_none());
    }
}
