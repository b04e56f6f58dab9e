//! Configuration management
//!
//! All tunables are centralized here and loaded from a TOML file. Runtime
//! changes affect only subsequent operations; collections keep their
//! creation-time embedding model.

use crate::chunking::ChunkingConfig;
use crate::embedding::EmbeddingConfig;
use crate::error::{Result, TrawlError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub noise: NoiseSettings,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: current_timestamp(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the vector store
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("~/.trawl"),
        }
    }
}

/// HNSW and retrieval tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Candidate multiplier for ANN queries with metadata predicates
    pub over_retrieval: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            over_retrieval: 4,
        }
    }
}

/// Search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// "ANN" or "KNN"
    pub mode: String,
    pub default_k: usize,
    pub exclude_noise_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_ceiling: Option<f32>,
    pub keyword_boost: bool,
    pub keyword_weight: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            mode: "KNN".to_string(),
            default_k: 10,
            exclude_noise_default: false,
            distance_ceiling: None,
            keyword_boost: false,
            keyword_weight: 0.3,
        }
    }
}

/// Noise flagging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseSettings {
    /// Rule file path; built-in defaults are used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            index: IndexSettings::default(),
            search: SearchSettings::default(),
            noise: NoiseSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TrawlError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: TRAWL_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("TRAWL_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__ROOT_DIR" => {
                self.storage.root_dir = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DEVICE" => {
                self.embedding.device = value.to_string();
            }
            "SEARCH__MODE" => {
                self.search.mode = value.to_string();
            }
            "SEARCH__DEFAULT_K" => {
                self.search.default_k =
                    value.parse().map_err(|_| TrawlError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?;
            }
            "SEARCH__EXCLUDE_NOISE_DEFAULT" => {
                self.search.exclude_noise_default =
                    value.parse().map_err(|_| TrawlError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| TrawlError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("trawl").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.search.mode, "KNN");
        assert_eq!(loaded.chunking.window_size, 3);
        assert_eq!(loaded.embedding.model, "multilingual-e5-small");
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = Config::load(&temp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, TrawlError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[search]\nmode = \"ANN\"\ndefault_k = 25\nexclude_noise_default = false\nkeyword_boost = false\nkeyword_weight = 0.3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.search.mode, "ANN");
        assert_eq!(config.search.default_k, 25);
        assert_eq!(config.chunking.window_size, 3);
    }
}
