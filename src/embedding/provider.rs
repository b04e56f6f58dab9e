//! Embedding provider trait and FastEmbed implementation

use crate::error::{Result, TrawlError};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::Arc;

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends, and lets tests run
/// against a deterministic stub instead of a downloaded model.
pub trait EmbeddingProvider: Send + Sync {
    /// Encode a batch of texts into vectors, one per input, same order
    ///
    /// Empty strings are encoded as-is; the result is deterministic per
    /// model. Implementations should batch internally for throughput.
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The fixed embedding dimension
    fn dimension(&self) -> usize;

    /// The model identifier
    fn model_id(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Models are downloaded on first use (~100-500MB depending on the model)
/// and cached on disk afterwards.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_id: String,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedProvider {
    /// Load a model; at most one load per (model, device) should happen per
    /// process, see `Embedders`
    pub fn load(model_id: &str, device: &str, cache_dir: Option<&Path>) -> Result<Self> {
        let (embedding_model, dimension) = resolve_model(model_id)?;

        // Execution is CPU-side through onnxruntime; the device hint is kept
        // for configuration compatibility
        tracing::info!(
            "Loading embedding model {} ({}D, device hint: {})",
            model_id,
            dimension,
            device
        );

        let mut init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir.to_path_buf());
        }

        let model =
            TextEmbedding::try_new(init_options).map_err(|e| TrawlError::ModelUnavailable {
                model_id: model_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            model: Arc::new(model),
            model_id: model_id.to_string(),
            dimension,
            batch_size: 32,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| TrawlError::EncodeFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(TrawlError::EncodeFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(TrawlError::EncodeFailed(format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    embedding.len()
                )));
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Map a model id to the FastEmbed model enum and its dimension
fn resolve_model(model_id: &str) -> Result<(EmbeddingModel, usize)> {
    match model_id {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, 384))
        }
        "bge-small-en-v1.5" | "BAAI/bge-small-en-v1.5" => {
            Ok((EmbeddingModel::BGESmallENV15, 384))
        }
        "bge-base-en-v1.5" | "BAAI/bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            Ok((EmbeddingModel::MultilingualE5Small, 384))
        }
        _ => Err(TrawlError::ModelUnavailable {
            model_id: model_id.to_string(),
            reason: "unsupported model; supported: all-MiniLM-L6-v2, bge-small-en-v1.5, \
                     bge-base-en-v1.5, multilingual-e5-small"
                .to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_is_unavailable() {
        let err = FastEmbedProvider::load("no-such-model", "auto", None).unwrap_err();
        assert!(matches!(err, TrawlError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_model_resolution() {
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(resolve_model("BAAI/bge-base-en-v1.5").unwrap().1, 768);
        assert!(resolve_model("gpt-2").is_err());
    }

    #[test]
    #[ignore] // Requires model download - run with: cargo test -- --ignored
    fn test_encode_preserves_order_and_dimension() {
        let provider = FastEmbedProvider::load("all-MiniLM-L6-v2", "cpu", None).unwrap();
        assert_eq!(provider.dimension(), 384);

        let texts = vec![
            "meeting at the docks".to_string(),
            "".to_string(),
            "wire the money".to_string(),
        ];
        let embeddings = provider.encode(&texts).unwrap();
        assert_eq!(embeddings.len(), 3);
        for e in &embeddings {
            assert_eq!(e.len(), 384);
        }

        // Empty input must still be deterministic
        let again = provider.encode(&texts).unwrap();
        assert_eq!(embeddings[1], again[1]);
    }

    #[test]
    #[ignore] // Requires model download - run with: cargo test -- --ignored
    fn test_semantic_similarity() {
        let provider = FastEmbedProvider::load("all-MiniLM-L6-v2", "cpu", None).unwrap();

        let texts = vec![
            "The cat sits on the mat.".to_string(),
            "A feline rests on the rug.".to_string(),
            "Quarterly financial report attached.".to_string(),
        ];
        let embeddings = provider.encode(&texts).unwrap();

        let sim = |a: &[f32], b: &[f32]| -> f32 {
            let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            dot / (na * nb)
        };

        assert!(sim(&embeddings[0], &embeddings[1]) > sim(&embeddings[0], &embeddings[2]));
    }
}
