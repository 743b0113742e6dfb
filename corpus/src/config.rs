//! Configuration for teddy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use teddy_embeddings::ModelSpec;

use crate::error::{CorpusError, Result};

/// Environment variable overriding [`TeddyConfig::default_model`].
pub const ENV_DEFAULT_MODEL: &str = "TEDDY_SEARCH_DEFAULT_MODEL";

/// Environment variable overriding [`TeddyConfig::cache_root`].
pub const ENV_CACHE_ROOT: &str = "TEDDY_CACHE_ROOT";

/// Environment variable overriding [`EmbeddingConfig::base_url`].
pub const ENV_BASE_URL: &str = "TEDDY_EMBEDDING_BASE_URL";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeddyConfig {
    /// Directory holding cached corpora.
    pub cache_root: PathBuf,

    /// Model key used when none is given.
    pub default_model: String,

    /// Embedding endpoint configuration.
    pub embedding: EmbeddingConfig,

    /// Supported models. Empty means the built-in table.
    pub models: Vec<ModelSpec>,
}

impl Default for TeddyConfig {
    fn default() -> Self {
        Self {
            cache_root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("teddy")
                .join("cache"),
            default_model: "MiniLM-L6-v2".to_string(),
            embedding: EmbeddingConfig::default(),
            models: Vec::new(),
        }
    }
}

impl TeddyConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: TeddyConfig = toml::from_str(content)
            .map_err(|e| CorpusError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(ENV_DEFAULT_MODEL).filter(|v| !v.is_empty()) {
            self.default_model = model;
        }
        if let Some(root) = lookup(ENV_CACHE_ROOT).filter(|v| !v.is_empty()) {
            self.cache_root = PathBuf::from(root);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.embedding.base_url = url;
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// The configured models, or the built-in table when none are listed.
    pub fn model_specs(&self) -> Vec<ModelSpec> {
        if self.models.is_empty() {
            ModelSpec::builtin()
        } else {
            self.models.clone()
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(CorpusError::Config(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(CorpusError::Config(
                "embedding.timeout_secs must be > 0".to_string(),
            ));
        }

        let specs = self.model_specs();
        for (i, spec) in specs.iter().enumerate() {
            if spec.key.is_empty() || spec.model.is_empty() {
                return Err(CorpusError::Config(format!(
                    "models[{i}] needs both key and model"
                )));
            }
            if specs[..i].iter().any(|s| s.key == spec.key) {
                return Err(CorpusError::Config(format!(
                    "duplicate model key: {}",
                    spec.key
                )));
            }
        }
        if !specs.iter().any(|s| s.key == self.default_model) {
            return Err(CorpusError::Config(format!(
                "default_model '{}' is not among the configured models",
                self.default_model
            )));
        }
        Ok(())
    }
}

/// Embedding endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base, without `/embeddings`.
    pub base_url: String,

    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,

    /// Hard limit on one embedding call, in seconds.
    pub timeout_secs: u64,

    /// Texts per HTTP request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key_env: Some("TEDDY_EMBEDDING_API_KEY".to_string()),
            timeout_secs: 120,
            batch_size: 64,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Load a config file. A missing file yields the defaults.
pub async fn load_config(path: &Path) -> Result<TeddyConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => TeddyConfig::from_toml(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TeddyConfig::default()),
        Err(e) => Err(CorpusError::Config(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = TeddyConfig::default();
        config.validate().unwrap();
        assert_eq!(config.model_specs(), ModelSpec::builtin());
    }

    #[test]
    fn test_parse_full_document() {
        let config = TeddyConfig::from_toml(
            r#"
            cache_root = "/tmp/teddy"
            default_model = "m1"

            [embedding]
            base_url = "http://embed:9000/v1"
            timeout_secs = 5
            batch_size = 8

            [[models]]
            key = "m1"
            model = "org/model-one"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_root, PathBuf::from("/tmp/teddy"));
        assert_eq!(config.embedding.timeout(), Duration::from_secs(5));
        assert_eq!(config.embedding.batch_size, 8);
        assert_eq!(config.model_specs(), vec![ModelSpec::new("m1", "org/model-one")]);
    }

    #[test]
    fn test_rejects_unknown_default_model() {
        let err = TeddyConfig::from_toml(r#"default_model = "nope""#).unwrap_err();
        assert!(matches!(err, CorpusError::Config(msg) if msg.contains("nope")));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let err = TeddyConfig::from_toml(
            r#"
            default_model = "m1"
            [[models]]
            key = "m1"
            model = "a"
            [[models]]
            key = "m1"
            model = "b"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CorpusError::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_rejects_zero_batch() {
        assert!(TeddyConfig::from_toml("[embedding]\nbatch_size = 0").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = TeddyConfig::default();
        config.apply_overrides(|name| match name {
            ENV_DEFAULT_MODEL => Some("MPNet-base-v2".to_string()),
            ENV_CACHE_ROOT => Some("/var/cache/teddy".to_string()),
            _ => None,
        });
        assert_eq!(config.default_model, "MPNet-base-v2");
        assert_eq!(config.cache_root, PathBuf::from("/var/cache/teddy"));
        assert_eq!(config.embedding.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&temp_dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config, TeddyConfig::default());
    }
}
