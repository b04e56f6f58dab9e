//! Application context
//!
//! The three long-lived values every operation needs (embedder cache,
//! vector store, task registry) live here and are passed explicitly. No
//! globals.

use crate::config::Config;
use crate::embedding::{Embedders, FastEmbedProvider};
use crate::error::{Result, TrawlError};
use crate::noise::NoiseFlagger;
use crate::pipeline::Indexer;
use crate::search::{SearchConfig, SearchEngine};
use crate::store::{AnnParams, SearchMode, StoreConfig, VectorStore};
use crate::tasks::TaskRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Long-lived application state shared by CLI commands
pub struct AppContext {
    pub config: Config,
    pub store: Arc<VectorStore>,
    pub tasks: Arc<TaskRegistry>,
    pub embedders: Embedders,
}

impl AppContext {
    /// Build the context from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let root = expand_path(&config.storage.root_dir)?;

        let store_config = StoreConfig {
            ann: AnnParams {
                m: config.index.hnsw_m,
                ef_construction: config.index.hnsw_ef_construction,
                ef_search: config.index.hnsw_ef_search,
            },
            over_retrieval: config.index.over_retrieval,
        };

        let store = Arc::new(VectorStore::open(root, store_config)?);
        let embedders = Embedders::new(config.embedding.cache_dir.clone());

        Ok(Self {
            config,
            store,
            tasks: Arc::new(TaskRegistry::new()),
            embedders,
        })
    }

    /// The configured embedding provider, loaded at most once per process
    pub fn provider(&self) -> Result<Arc<FastEmbedProvider>> {
        self.embedders
            .get(&self.config.embedding.model, &self.config.embedding.device)
    }

    /// A pipeline bound to this context
    pub fn indexer(&self) -> Result<Arc<Indexer>> {
        let noise = NoiseFlagger::from_file_or_default(
            self.config.noise.rules_file.as_deref(),
        )?;

        Ok(Arc::new(Indexer::new(
            self.store.clone(),
            self.provider()?,
            self.tasks.clone(),
            Arc::new(noise),
            self.config.chunking,
            self.config.embedding.batch_size,
        )))
    }

    /// A search engine bound to this context
    pub fn engine(&self) -> Result<SearchEngine> {
        let mode = SearchMode::parse(&self.config.search.mode).ok_or_else(|| {
            TrawlError::Config(format!("Unknown search mode '{}'", self.config.search.mode))
        })?;

        let search_config = SearchConfig {
            mode,
            default_k: self.config.search.default_k,
            exclude_noise_default: self.config.search.exclude_noise_default,
            distance_ceiling: self.config.search.distance_ceiling,
            keyword_boost: self.config.search.keyword_boost,
            keyword_weight: self.config.search.keyword_weight,
        };

        Ok(SearchEngine::new(
            self.store.clone(),
            self.provider()?,
            search_config,
        ))
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| TrawlError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| TrawlError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
