//! Runtime configuration.
//!
//! Loaded from YAML or JSON, with environment overrides for the handful
//! of settings that are usually deployment-specific.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use turnwise_core::metrics::DEFAULT_SEMANTIC_THRESHOLD;

pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub const SEMANTIC_THRESHOLD_ENV: &str = "SEMANTIC_THRESHOLD";
pub const RUNS_ROOT_ENV: &str = "TURNWISE_RUNS_ROOT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory that holds one folder per run
    pub runs_root: PathBuf,

    /// Token budget handed to the context builder
    pub max_tokens: u32,

    /// Pass threshold for semantic similarity
    pub semantic_threshold: f32,

    /// Domain used when a dataset does not declare one
    pub default_domain: String,

    pub providers: ProviderConfig,

    pub embeddings: EmbeddingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from("./runs"),
            max_tokens: 2048,
            semantic_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            default_domain: "commerce".to_string(),
            providers: ProviderConfig::default(),
            embeddings: EmbeddingConfig::default(),
        }
    }
}

/// Endpoints and transport settings for the provider adapters.
///
/// API keys are not part of the config file; adapters read them from the
/// environment through [`crate::providers::secrets`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub ollama_host: String,
    pub openai_base_url: String,
    pub gemini_base_url: String,

    #[serde(with = "duration_str")]
    pub request_timeout: Duration,

    /// Transport-level retries inside an adapter
    pub max_retries: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            ollama_host: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub cache_capacity: u64,
    #[serde(with = "duration_str")]
    pub cache_ttl: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            cache_capacity: 10_000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Durations as human-readable strings ("60s", "1h 30m").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml`/`.json` file, then apply env overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str::<Self>(&raw)?,
            Some("json") => serde_json::from_str::<Self>(&raw)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var(OLLAMA_HOST_ENV) {
            self.providers.ollama_host = host;
        }
        if let Ok(root) = std::env::var(RUNS_ROOT_ENV) {
            self.runs_root = PathBuf::from(root);
        }
        if let Ok(raw) = std::env::var(SEMANTIC_THRESHOLD_ENV) {
            self.semantic_threshold = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "semantic_threshold",
                reason: format!("'{}' is not a number", raw),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.semantic_threshold) {
            return Err(ConfigError::Invalid {
                key: "semantic_threshold",
                reason: format!("{} is outside [0, 1]", self.semantic_threshold),
            });
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                key: "max_tokens",
                reason: "must be greater than 0".to_string(),
            });
        }

        let urls = [
            ("providers.ollama_host", &self.providers.ollama_host),
            ("providers.openai_base_url", &self.providers.openai_base_url),
            ("providers.gemini_base_url", &self.providers.gemini_base_url),
        ];
        for (key, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("'{}' must start with http:// or https://", url),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.semantic_threshold, 0.80);
        assert_eq!(config.default_domain, "commerce");
        assert_eq!(config.providers.request_timeout, Duration::from_secs(60));
        assert_eq!(config.embeddings.cache_capacity, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = RuntimeConfig::from_yaml(
            r#"
max_tokens: 1024
semantic_threshold: 0.9
providers:
  ollama_host: "http://gpu-box:11434"
  request_timeout: "2m 30s"
embeddings:
  cache_ttl: "10m"
"#,
        )
        .unwrap();

        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.semantic_threshold, 0.9);
        assert_eq!(config.providers.ollama_host, "http://gpu-box:11434");
        assert_eq!(config.providers.request_timeout, Duration::from_secs(150));
        assert_eq!(config.providers.max_retries, 2);
        assert_eq!(config.embeddings.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.embeddings.model, "nomic-embed-text");
    }

    #[test]
    fn test_from_json() {
        let config = RuntimeConfig::from_json(r#"{"runs_root": "/tmp/runs", "default_domain": "travel"}"#).unwrap();
        assert_eq!(config.runs_root, PathBuf::from("/tmp/runs"));
        assert_eq!(config.default_domain, "travel");
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            RuntimeConfig::from_yaml("semantic_threshold: 1.5"),
            Err(ConfigError::Invalid { key: "semantic_threshold", .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("max_tokens: 0"),
            Err(ConfigError::Invalid { key: "max_tokens", .. })
        ));
        assert!(matches!(
            RuntimeConfig::from_yaml("providers:\n  openai_base_url: api.openai.com"),
            Err(ConfigError::Invalid { key: "providers.openai_base_url", .. })
        ));
        assert!(RuntimeConfig::from_yaml("providers:\n  request_timeout: soon").is_err());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("runtime.yaml");
        std::fs::write(&yaml_path, "max_tokens: 512\n").unwrap();
        assert_eq!(RuntimeConfig::from_file(&yaml_path).unwrap().max_tokens, 512);

        let json_path = dir.path().join("runtime.json");
        std::fs::write(&json_path, r#"{"max_tokens": 256}"#).unwrap();
        assert_eq!(RuntimeConfig::from_file(&json_path).unwrap().max_tokens, 256);

        let toml_path = dir.path().join("runtime.toml");
        std::fs::write(&toml_path, "max_tokens = 1").unwrap();
        assert!(matches!(
            RuntimeConfig::from_file(&toml_path),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "toml"
        ));
    }

    #[test]
    fn test_duration_round_trips_as_string() {
        let json = serde_json::to_value(EmbeddingConfig::default()).unwrap();
        assert_eq!(json["cache_ttl"], "1h");
    }
}
