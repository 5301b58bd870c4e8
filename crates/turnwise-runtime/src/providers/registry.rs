//! Name → provider lookup.
//!
//! The registry is built once by the composition root and shared by every
//! pipeline. Model specs name a provider by its registry key
//! (`ollama:llama3.2` → `"ollama"`).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ChatProvider;
use crate::config::ProviderConfig;
use crate::RuntimeError;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    ///
    /// A provider with the same name is replaced.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Register a provider under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is a `NotFound` error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ChatProvider>, RuntimeError> {
        self.get(name)
            .ok_or_else(|| RuntimeError::not_found("provider", name))
    }

    /// List registered provider names.
    pub fn available(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registry with every adapter compiled into this build.
    ///
    /// Adapters whose API key is missing are still registered; their calls
    /// fail with `NotConfigured`, which the pipeline records as a failed turn.
    #[allow(unused_variables, unused_mut)]
    pub fn with_defaults(config: &ProviderConfig) -> Result<Self, RuntimeError> {
        let mut registry = Self::new();

        #[cfg(feature = "ollama")]
        registry.register(Arc::new(
            super::OllamaProvider::from_config(config).map_err(|e| RuntimeError::Internal(e.to_string()))?,
        ));

        #[cfg(feature = "openai")]
        registry.register(Arc::new(
            super::OpenAiProvider::from_config(config).map_err(|e| RuntimeError::Internal(e.to_string()))?,
        ));

        #[cfg(feature = "gemini")]
        registry.register(Arc::new(
            super::GeminiProvider::from_config(config).map_err(|e| RuntimeError::Internal(e.to_string()))?,
        ));

        Ok(registry)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available())
            .finish()
    }
}
