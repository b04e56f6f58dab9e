//! Configuration validation

use super::Config;
use crate::error::{Result, TrawlError, ValidationError};
use crate::store::SearchMode;

/// Validates a configuration before it is used
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole configuration, collecting every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrawlError::ConfigValidation { errors })
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.window_size == 0 {
            errors.push(ValidationError::new(
                "chunking.window_size",
                "must be >= 1",
            ));
        }
        if config.chunking.window_size > 0 && config.chunking.overlap >= config.chunking.window_size
        {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "must be < window_size ({})",
                    config.chunking.window_size
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new("embedding.model", "must not be empty"));
        }
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new("embedding.batch_size", "must be >= 1"));
        }
        if !matches!(config.embedding.device.as_str(), "auto" | "cpu") {
            errors.push(ValidationError::new(
                "embedding.device",
                format!("unknown device '{}'", config.embedding.device),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new("index.hnsw_m", "must be >= 1"));
        }
        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "must be >= 1",
            ));
        }
        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new("index.hnsw_ef_search", "must be >= 1"));
        }
        if config.index.over_retrieval == 0 {
            errors.push(ValidationError::new("index.over_retrieval", "must be >= 1"));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if SearchMode::parse(&config.search.mode).is_none() {
            errors.push(ValidationError::new(
                "search.mode",
                format!("must be 'ANN' or 'KNN', got '{}'", config.search.mode),
            ));
        }
        if config.search.default_k == 0 {
            errors.push(ValidationError::new("search.default_k", "must be >= 1"));
        }
        if !(0.0..=1.0).contains(&config.search.keyword_weight) {
            errors.push(ValidationError::new(
                "search.keyword_weight",
                "must be within [0, 1]",
            ));
        }
        if let Some(ceiling) = config.search.distance_ceiling {
            if !(0.0..=1.0).contains(&ceiling) {
                errors.push(ValidationError::new(
                    "search.distance_ceiling",
                    "must be within [0, 1]",
                ));
            }
        }
    }
}
