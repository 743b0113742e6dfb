//! Model registry.
//!
//! The registry maps friendly model keys (e.g. `MiniLM-L6-v2`) to provider
//! handles. It is owned by the application and passed to whoever needs
//! embeddings; handles are built lazily, once per key, and kept for the
//! registry's lifetime. Memory therefore grows with the number of distinct
//! keys used, never with the number of calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{EmbeddingError, Result};
use crate::provider::{DEFAULT_BATCH_SIZE, EmbeddingProvider, OpenAIProvider};

/// A model the registry knows how to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Friendly key used in cache identities and on the command line.
    pub key: String,

    /// Provider-side model name.
    pub model: String,
}

impl ModelSpec {
    pub fn new(key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: model.into(),
        }
    }

    /// The sentence-transformers models teddy ships with.
    pub fn builtin() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new(
                "MiniLM-L6-v2",
                "sentence-transformers/paraphrase-MiniLM-L6-v2",
            ),
            ModelSpec::new("MPNet-base-v2", "sentence-transformers/all-mpnet-base-v2"),
        ]
    }
}

/// Builds provider handles for the registry.
pub trait ProviderFactory: Send + Sync {
    /// Construct a handle for `spec`. Called at most once per key.
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingProvider>>;
}

/// Factory producing [`OpenAIProvider`] handles against one endpoint.
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
    base_url: String,
    api_key: Option<String>,
    batch_size: usize,
}

impl HttpProviderFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, spec: &ModelSpec) -> Result<Arc<dyn EmbeddingProvider>> {
        if self.base_url.is_empty() {
            return Err(EmbeddingError::ProviderNotConfigured);
        }
        let mut provider = OpenAIProvider::new(&spec.model)
            .with_base_url(&self.base_url)
            .with_batch_size(self.batch_size);
        if let Some(key) = &self.api_key {
            provider = provider.with_api_key(key);
        }
        Ok(Arc::new(provider))
    }
}

/// Registry of supported models and their lazily built provider handles.
pub struct ModelRegistry {
    /// Supported models, in registration order.
    specs: Vec<ModelSpec>,

    /// Builds a handle the first time a key is used.
    factory: Box<dyn ProviderFactory>,

    /// Handles built so far.
    loaded: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl ModelRegistry {
    /// Create a registry over `specs`. Later duplicates of a key are ignored.
    pub fn new(specs: Vec<ModelSpec>, factory: impl ProviderFactory + 'static) -> Self {
        let mut unique: Vec<ModelSpec> = Vec::with_capacity(specs.len());
        for spec in specs {
            if !unique.iter().any(|s| s.key == spec.key) {
                unique.push(spec);
            }
        }
        Self {
            specs: unique,
            factory: Box::new(factory),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Registry over the built-in model table.
    pub fn with_builtin(factory: impl ProviderFactory + 'static) -> Self {
        Self::new(ModelSpec::builtin(), factory)
    }

    /// Whether `key` names a supported model.
    pub fn contains(&self, key: &str) -> bool {
        self.spec(key).is_some()
    }

    /// Supported keys, in registration order.
    pub fn keys(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn specs(&self) -> &[ModelSpec] {
        &self.specs
    }

    pub fn spec(&self, key: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.key == key)
    }

    /// Get the provider handle for `key`, building it on first use.
    pub async fn provider(&self, key: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        let spec = self
            .spec(key)
            .ok_or_else(|| EmbeddingError::UnsupportedModel(key.to_string()))?;

        let mut loaded = self.loaded.lock().await;
        if let Some(provider) = loaded.get(key) {
            return Ok(Arc::clone(provider));
        }

        let provider = self.factory.create(spec)?;
        info!("Loaded embedding model {key} ({})", spec.model);
        loaded.insert(key.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}
