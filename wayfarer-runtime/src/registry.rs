//! Provider registry: provider id + model id to a callable model handle.

use crate::config::ProviderConfig;
use crate::error::ConfigError;
use crate::llm_client::LLMClient;
use crate::model::ModelHandle;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a handle for one model id of a provider.
pub type ModelFactory = Arc<dyn Fn(&str) -> Result<ModelHandle, ConfigError> + Send + Sync>;

struct ProviderEntry {
    models: Vec<String>,
    factory: ModelFactory,
}

/// A built-in OpenAI-compatible backend.
struct Backend {
    id: &'static str,
    base_url: &'static str,
    api_key_env: &'static str,
}

const BACKENDS: &[Backend] = &[
    Backend {
        id: "groq",
        base_url: "https://api.groq.com/openai/v1",
        api_key_env: "GROQ_API_KEY",
    },
    Backend {
        id: "google_genai",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        api_key_env: "GOOGLE_API_KEY",
    },
    Backend {
        id: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env: "OPENAI_API_KEY",
    },
];

/// Maps `(provider, model)` to model handles.
///
/// Handles are built on first resolve and cached; repeated resolves return
/// the same `Arc`. Registration happens up front, after which the registry is
/// shared read-only behind an `Arc`.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderEntry>,
    cache: RwLock<HashMap<(String, String), ModelHandle>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider with its valid model ids.
    pub fn register<F>(&mut self, provider: impl Into<String>, models: Vec<String>, factory: F)
    where
        F: Fn(&str) -> Result<ModelHandle, ConfigError> + Send + Sync + 'static,
    {
        let provider = provider.into();
        debug!(provider = %provider, models = models.len(), "registering provider");
        self.cache.write().retain(|(p, _), _| p != &provider);
        self.providers.insert(
            provider,
            ProviderEntry {
                models,
                factory: Arc::new(factory),
            },
        );
    }

    /// Build a registry from the `models` config table.
    ///
    /// Entries sharing a `model_provider` merge their model lists.
    pub fn from_config(models: &BTreeMap<String, ProviderConfig>) -> Result<Self, ConfigError> {
        let mut merged: BTreeMap<String, (Vec<String>, Option<String>)> = BTreeMap::new();
        for cfg in models.values() {
            let entry = merged
                .entry(cfg.model_provider.clone())
                .or_insert_with(|| (Vec::new(), None));
            for model in &cfg.model {
                if !entry.0.contains(model) {
                    entry.0.push(model.clone());
                }
            }
            if cfg.base_url.is_some() {
                entry.1 = cfg.base_url.clone();
            }
        }

        let mut registry = Self::new();
        for (provider, (model_ids, base_url)) in merged {
            let backend = BACKENDS
                .iter()
                .find(|b| b.id == provider)
                .ok_or_else(|| ConfigError::UnknownProvider(provider.clone()))?;
            let base_url = base_url.unwrap_or_else(|| backend.base_url.to_string());
            let api_key_env = backend.api_key_env;
            let provider_id = provider.clone();

            registry.register(provider, model_ids, move |model: &str| {
                let api_key = std::env::var(api_key_env)
                    .ok()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| ConfigError::MissingCredentials(api_key_env.to_string()))?;
                let client =
                    LLMClient::new(&provider_id, base_url.clone(), model).with_api_key(api_key);
                Ok(Arc::new(client) as ModelHandle)
            });
        }

        info!(providers = registry.providers.len(), "provider registry ready");
        Ok(registry)
    }

    /// Resolve a model handle, constructing and caching it on first use.
    pub fn resolve(&self, provider: &str, model: &str) -> Result<ModelHandle, ConfigError> {
        let key = (provider.to_string(), model.to_string());
        if let Some(handle) = self.cache.read().get(&key) {
            return Ok(Arc::clone(handle));
        }

        let entry = self
            .providers
            .get(provider)
            .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))?;
        if !entry.models.iter().any(|m| m == model) {
            return Err(ConfigError::UnknownModel {
                provider: provider.to_string(),
                model: model.to_string(),
            });
        }

        let mut cache = self.cache.write();
        if let Some(handle) = cache.get(&key) {
            return Ok(Arc::clone(handle));
        }
        let handle = (entry.factory)(model)?;
        debug!(provider, model, "model handle created");
        cache.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Resolve a `provider:model` reference.
    pub fn resolve_qualified(&self, reference: &str) -> Result<ModelHandle, ConfigError> {
        let (provider, model) = split_model_ref(reference)?;
        self.resolve(provider, model)
    }

    /// Registered provider ids, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Model ids offered by a provider, in registration order.
    pub fn models(&self, provider: &str) -> Result<&[String], ConfigError> {
        self.providers
            .get(provider)
            .map(|e| e.models.as_slice())
            .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))
    }
}

/// Split `provider:model` at the first colon.
pub fn split_model_ref(reference: &str) -> Result<(&str, &str), ConfigError> {
    match reference.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(ConfigError::InvalidModelRef(reference.to_string())),
    }
}
