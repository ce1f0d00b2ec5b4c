//! Provider registry: maps provider keys to factories and caches one adapter
//! per key.

use crate::error::{LlmError, Result};
use crate::provider::{ChatProvider, ProviderConfig, ProviderKind};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig, &reqwest::Client) -> Result<Arc<dyn ChatProvider>> + Send + Sync>;

pub struct ProviderRegistry {
    http: reqwest::Client,
    factories: HashMap<String, ProviderFactory>,
    configs: DashMap<String, ProviderConfig>,
    adapters: DashMap<String, Arc<dyn ChatProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.supported_providers())
            .field("cached", &self.adapters.len())
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with a factory for every built-in provider.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });

        let mut factories: HashMap<String, ProviderFactory> = HashMap::new();
        for kind in ProviderKind::ALL {
            let factory: ProviderFactory =
                Arc::new(move |cfg: &ProviderConfig, http: &reqwest::Client| kind.build(cfg, http));
            factories.insert(kind.key().to_string(), factory);
        }

        Self {
            http,
            factories,
            configs: DashMap::new(),
            adapters: DashMap::new(),
        }
    }

    /// Adds or replaces the factory for `key`. Any cached adapter is dropped.
    pub fn register_factory(&mut self, key: impl Into<String>, factory: ProviderFactory) {
        let key = key.into().to_ascii_lowercase();
        self.adapters.remove(&key);
        self.factories.insert(key, factory);
    }

    /// Registers a prebuilt adapter under `key`.
    pub fn register_adapter(&mut self, key: impl Into<String>, adapter: Arc<dyn ChatProvider>) {
        self.register_factory(
            key,
            Arc::new(move |_: &ProviderConfig, _: &reqwest::Client| Ok(Arc::clone(&adapter))),
        );
    }

    /// Sets the configuration used the next time `key` is constructed.
    pub fn configure(&self, key: &str, config: ProviderConfig) {
        let key = key.to_ascii_lowercase();
        if self.adapters.remove(&key).is_some() {
            tracing::debug!(provider = %key, "provider reconfigured; cached adapter dropped");
        }
        self.configs.insert(key, config);
    }

    pub fn config(&self, key: &str) -> Option<ProviderConfig> {
        self.configs.get(key).map(|c| c.value().clone())
    }

    pub fn is_supported(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Sorted provider keys.
    pub fn supported_providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the cached adapter for `key`, constructing it on first use.
    /// Concurrent first calls may both construct; the first insert wins and
    /// every caller receives that instance.
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn ChatProvider>> {
        if let Some(adapter) = self.adapters.get(key) {
            return Ok(Arc::clone(adapter.value()));
        }

        let Some(factory) = self.factories.get(key) else {
            return Err(LlmError::UnknownProvider {
                key: key.to_string(),
                supported: self.supported_providers(),
            });
        };

        let config = self.config(key).unwrap_or_default();
        let built = factory(&config, &self.http).map_err(|e| match e {
            LlmError::ProviderInit { .. } => e,
            other => LlmError::init(key, other.to_string()),
        })?;
        tracing::info!(provider = %key, "provider adapter initialized");

        let adapter = self
            .adapters
            .entry(key.to_string())
            .or_insert(built)
            .value()
            .clone();
        Ok(adapter)
    }
}
