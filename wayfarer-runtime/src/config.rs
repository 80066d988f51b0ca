//! Application configuration loader (TOML or YAML).

use crate::error::ConfigError;
use crate::middleware::MiddlewareSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One selectable provider entry: the models it offers and its backend id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: Vec<String>,
    pub model_provider: String,
    /// Override for the backend's default API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Prompts for one flow (`summarizer`, `travel_info_agent`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInstructions {
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub sys_prompt: Option<String>,
    #[serde(default)]
    pub summarizer_prompt: Option<String>,
}

impl FlowInstructions {
    /// `sys_prompt`, falling back to `instruction`, else empty.
    pub fn system_prompt(&self) -> &str {
        self.sys_prompt
            .as_deref()
            .or(self.instruction.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub instructions: BTreeMap<String, FlowInstructions>,
    #[serde(default)]
    pub middleware: MiddlewareSettings,
}

impl AppConfig {
    /// Load and validate a config file. The format follows the extension:
    /// `.toml`, or `.yaml`/`.yml`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(ConfigError::Invalid("Config file is empty".to_string()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let config = match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "Unsupported config format: {}",
                    path.display()
                )))
            }
        };

        info!(
            path = %path.display(),
            providers = config.models.len(),
            flows = config.instructions.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, provider) in &self.models {
            if provider.model.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "models.{} must list at least one model",
                    key
                )));
            }
            if provider.model_provider.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "models.{} is missing model_provider",
                    key
                )));
            }
        }
        self.middleware.validate()
    }

    /// Instructions for a flow.
    pub fn flow(&self, name: &str) -> Option<&FlowInstructions> {
        self.instructions.get(name)
    }

    /// Provider entry by key, ignoring case (`groq` finds `GROQ`).
    pub fn provider(&self, key: &str) -> Option<&ProviderConfig> {
        self.models
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Provider keys upper-cased, as offered for selection.
    pub fn provider_keys(&self) -> Vec<String> {
        self.models.keys().map(|k| k.to_uppercase()).collect()
    }
}
