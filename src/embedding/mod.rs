//! Embedding model adapter
//!
//! The adapter is the only place that knows about model-specific quirks.
//! Downstream code sees opaque vectors of a known dimension through the
//! `EmbeddingProvider` trait.

mod provider;

pub use provider::{EmbeddingProvider, FastEmbedProvider};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g. "multilingual-e5-small")
    pub model: String,
    /// Device hint: "auto", "cpu"
    pub device: String,
    /// Batch size for encoding
    pub batch_size: usize,
    /// Optional cache directory for downloaded model files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "multilingual-e5-small".to_string(),
            device: "auto".to_string(),
            batch_size: 32,
            cache_dir: None,
        }
    }
}

/// Cache of loaded embedder handles, one per (model, device) pair
///
/// Model loading is slow (seconds to tens of seconds); handles are loaded at
/// most once per process and shared. This lives in the application context,
/// not in a global.
#[derive(Default)]
pub struct Embedders {
    cache: Mutex<HashMap<String, Arc<FastEmbedProvider>>>,
    cache_dir: Option<PathBuf>,
}

impl Embedders {
    pub fn new(cache_dir: Option<PathBuf>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            cache_dir,
        }
    }

    /// Get or load the handle for a model
    pub fn get(&self, model_id: &str, device: &str) -> Result<Arc<FastEmbedProvider>> {
        let key = format!("{}@{}", model_id, device);

        let mut cache = self.cache.lock().unwrap();
        if let Some(handle) = cache.get(&key) {
            return Ok(handle.clone());
        }

        let handle = Arc::new(FastEmbedProvider::load(
            model_id,
            device,
            self.cache_dir.as_deref(),
        )?);
        cache.insert(key, handle.clone());
        Ok(handle)
    }
}
