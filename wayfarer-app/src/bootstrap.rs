//! Startup wiring: arguments, tracing, config and the chat session.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wayfarer_runtime::{
    AgentConfig, AppConfig, ChatSession, CheckpointStore, ModelHandle, ProviderRegistry,
    WebSearch,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";
pub const DEFAULT_FLOW: &str = "travel_info_agent";
pub const SUMMARIZER_FLOW: &str = "summarizer";

/// Command-line selection. Anything left unset falls back to the first
/// entry in the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub flow: String,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            provider: None,
            model: None,
            flow: DEFAULT_FLOW.to_string(),
        }
    }
}

impl CliArgs {
    /// Parse `[config_path] [--provider KEY] [--model NAME] [--flow NAME]`.
    /// `args` excludes the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Self::default();
        let mut positional = false;
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--provider" | "-p" => {
                    parsed.provider = Some(args.next().context("--provider needs a value")?)
                }
                "--model" | "-m" => {
                    parsed.model = Some(args.next().context("--model needs a value")?)
                }
                "--flow" | "-f" => parsed.flow = args.next().context("--flow needs a value")?,
                flag if flag.starts_with('-') => bail!("Unknown option: {}", flag),
                path => {
                    if positional {
                        bail!("Unexpected argument: {}", path);
                    }
                    parsed.config_path = PathBuf::from(path);
                    positional = true;
                }
            }
        }
        Ok(parsed)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything the REPL needs, built once at startup.
pub struct Bootstrap {
    pub app: AppConfig,
    pub registry: Arc<ProviderRegistry>,
    pub store: Arc<CheckpointStore>,
    pub provider_key: String,
    pub model: String,
    pub flow: String,
}

impl Bootstrap {
    pub fn load(args: &CliArgs) -> Result<Self> {
        let app = AppConfig::load(&args.config_path).with_context(|| {
            format!("Failed to load config from {}", args.config_path.display())
        })?;
        Self::from_app_config(app, args)
    }

    pub fn from_app_config(app: AppConfig, args: &CliArgs) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&app.models)
            .context("Failed to build provider registry")?;

        let provider_key = match &args.provider {
            Some(key) => key.clone(),
            None => app
                .provider_keys()
                .into_iter()
                .next()
                .context("No providers configured")?,
        };
        let provider = app
            .provider(&provider_key)
            .with_context(|| format!("Unknown provider: {}", provider_key))?;
        let model = match &args.model {
            Some(model) => model.clone(),
            None => provider
                .model
                .first()
                .cloned()
                .with_context(|| format!("No models listed for {}", provider_key))?,
        };

        if app.flow(&args.flow).is_none() {
            bail!("Unknown flow: {}", args.flow);
        }

        Ok(Self {
            app,
            registry: Arc::new(registry),
            store: Arc::new(CheckpointStore::default()),
            provider_key,
            model,
            flow: args.flow.clone(),
        })
    }

    /// Agent config for the current selection, with `web_search` attached.
    pub fn agent_config(&self) -> Result<AgentConfig> {
        let config =
            AgentConfig::from_app_config(&self.app, &self.flow, &self.provider_key, &self.model)
                .with_context(|| {
                    format!("Invalid selection {}/{}", self.provider_key, self.model)
                })?;
        Ok(config.with_tool(WebSearch::from_env().into_tool()))
    }

    pub fn session(&self) -> Result<ChatSession> {
        let session = ChatSession::new(
            self.agent_config()?,
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
        );
        info!(
            thread_id = %session.thread_id(),
            model = %session.config().model_ref(),
            flow = %self.flow,
            "session ready"
        );
        Ok(session)
    }

    /// Switch provider/model for subsequent turns.
    pub fn select(&mut self, provider_key: &str, model: &str) -> Result<AgentConfig> {
        let previous = (
            std::mem::replace(&mut self.provider_key, provider_key.to_string()),
            std::mem::replace(&mut self.model, model.to_string()),
        );
        match self.agent_config() {
            Ok(config) => Ok(config),
            Err(e) => {
                (self.provider_key, self.model) = previous;
                Err(e)
            }
        }
    }

    /// Handle for the selected model, shared with the registry cache.
    pub fn model_handle(&self) -> Result<ModelHandle> {
        let provider = self
            .app
            .provider(&self.provider_key)
            .with_context(|| format!("Unknown provider: {}", self.provider_key))?;
        self.registry
            .resolve(&provider.model_provider, &self.model)
            .with_context(|| format!("Cannot use {}/{}", self.provider_key, self.model))
    }

    /// Instruction for the one-shot summarizer flow.
    pub fn summarizer_instruction(&self) -> &str {
        self.app
            .flow(SUMMARIZER_FLOW)
            .map(|flow| flow.system_prompt())
            .unwrap_or("You are a helpful summarizer.")
    }
}
