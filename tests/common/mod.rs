//! Shared test fixtures
#![allow(dead_code)]

use std::sync::Arc;
use trawl::chunking::ChunkingConfig;
use trawl::embedding::EmbeddingProvider;
use trawl::error::Result;
use trawl::noise::{NoiseFlagger, NoiseRules};
use trawl::pipeline::Indexer;
use trawl::records::RawRecord;
use trawl::store::{StoreConfig, VectorStore};
use trawl::tasks::TaskRegistry;

pub const DIM: usize = 8;

/// Deterministic embedding stub
///
/// Texts starting with "axisN" map to the N-th basis vector, which lets tests
/// control cosine geometry exactly. Everything else gets a stable
/// pseudo-embedding derived from the bytes.
pub struct StubProvider;

impl EmbeddingProvider for StubProvider {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_id(&self) -> &str {
        "stub-embedder"
    }
}

pub fn stub_vector(text: &str) -> Vec<f32> {
    if let Some(rest) = text.strip_prefix("axis") {
        if let Some(axis) = rest.chars().next().and_then(|c| c.to_digit(10)) {
            let mut v = vec![0.0; DIM];
            v[axis as usize % DIM] = 1.0;
            return v;
        }
    }

    let mut v = vec![0.0f32; DIM];
    for (i, b) in text.bytes().enumerate() {
        v[i % DIM] += (b as f32) / 255.0 + ((i * 31) % 7) as f32 * 0.01;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

pub fn open_store(root: &std::path::Path) -> Arc<VectorStore> {
    Arc::new(VectorStore::open(root.join("store"), StoreConfig::default()).unwrap())
}

pub fn make_indexer(
    store: Arc<VectorStore>,
    tasks: Arc<TaskRegistry>,
    window_size: usize,
    overlap: usize,
) -> Arc<Indexer> {
    let noise = NoiseFlagger::new(&NoiseRules::default()).unwrap();
    Arc::new(Indexer::new(
        store,
        Arc::new(StubProvider),
        tasks,
        Arc::new(noise),
        ChunkingConfig {
            window_size,
            overlap,
        },
        16,
    ))
}

/// A raw incoming message row
pub fn raw_message(id: &str, text: &str, contact: &str, timestamp: Option<&str>) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        text: Some(text.to_string()),
        timestamp: timestamp.map(str::to_string),
        from: Some(contact.to_string()),
        to: Some("user".to_string()),
        direction: Some("incoming".to_string()),
        ..Default::default()
    }
}
