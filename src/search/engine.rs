//! Semantic search engine
//!
//! Encodes the query once, compiles predicates, issues the vector query in
//! the configured mode, applies the geographic post-filter and optional
//! keyword boost, and returns scored hits.

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, TrawlError};
use crate::search::filters::{self, CompiledFilters, SearchFilters};
use crate::store::{MetaValue, Metadata, SearchMode, VectorStore};
use serde::Serialize;
use std::sync::Arc;

/// Engine defaults, normally sourced from configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub mode: SearchMode,
    pub default_k: usize,
    pub exclude_noise_default: bool,
    /// Drop rows with distance above this ceiling
    pub distance_ceiling: Option<f32>,
    /// Blend BM25 keyword scores into the ranking
    pub keyword_boost: bool,
    /// Weight of the keyword component, within [0, 1]
    pub keyword_weight: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Knn,
            default_k: 10,
            exclude_noise_default: false,
            distance_ceiling: None,
            keyword_boost: false,
            keyword_weight: 0.3,
        }
    }
}

/// One search request against one collection
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub collection: String,
    pub query: String,
    pub k: Option<usize>,
    pub filters: SearchFilters,
    pub mode: Option<SearchMode>,
    pub exclude_noise: Option<bool>,
    pub distance_ceiling: Option<f32>,
}

/// A scored search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    /// 1 - distance, clamped to [0, 1]
    pub score: f32,
    pub distance: f32,
    pub document: String,
    pub metadata: Metadata,
    pub collection: String,
}

/// Query engine over the vector store
pub struct SearchEngine {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Search one collection
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let k = request.k.unwrap_or(self.config.default_k);
        if k == 0 {
            return Err(TrawlError::InvalidPredicate(
                "k must be >= 1".to_string(),
            ));
        }

        let info = self.store.collection_info(&request.collection)?;
        let exclude_noise = request
            .exclude_noise
            .unwrap_or(self.config.exclude_noise_default);
        let compiled = filters::compile(&request.filters, info.kind, exclude_noise)?;

        let qvec = self.encode_query(&request.query)?;

        // Over-retrieve when a geographic post-filter will discard candidates
        let fetch_k = if compiled.geo.is_some() {
            (2 * k).max(k + 20)
        } else {
            k
        };

        let mode = request.mode.unwrap_or(self.config.mode);
        let scored = self
            .store
            .query(&request.collection, &qvec, fetch_k, &compiled.predicate, mode)?;

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .filter(|row| geo_accepts(&compiled, &row.row.metadata))
            .map(|row| SearchHit {
                score: (1.0 - row.distance).clamp(0.0, 1.0),
                distance: row.distance,
                id: row.row.id,
                document: row.row.document,
                metadata: row.row.metadata,
                collection: request.collection.clone(),
            })
            .collect();

        if let Some(ceiling) = request.distance_ceiling.or(self.config.distance_ceiling) {
            hits.retain(|h| h.distance <= ceiling);
        }

        if self.config.keyword_boost && !hits.is_empty() {
            self.apply_keyword_boost(&request.collection, &request.query, &mut hits, k)?;
        }

        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Search several collections and merge by global score
    ///
    /// A missing collection is skipped rather than failing the whole request.
    pub fn search_many(
        &self,
        collections: &[String],
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        let mut merged = Vec::new();

        for collection in collections {
            let mut per_collection = request.clone();
            per_collection.collection = collection.clone();

            match self.search(&per_collection) {
                Ok(hits) => merged.extend(hits),
                Err(TrawlError::CollectionNotFound(name)) => {
                    tracing::warn!("Skipping missing collection '{}'", name);
                }
                Err(e) => return Err(e),
            }
        }

        // Stable merge: descending score, then (collection, id)
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.collection.cmp(&b.collection))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(merged)
    }

    fn encode_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.provider.encode(&[query.to_string()])?;
        if vectors.is_empty() {
            return Err(TrawlError::EncodeFailed(
                "encoder returned no vector for the query".to_string(),
            ));
        }
        Ok(vectors.remove(0))
    }

    /// Blend normalized BM25 scores into the semantic scores
    fn apply_keyword_boost(
        &self,
        collection: &str,
        query: &str,
        hits: &mut [SearchHit],
        k: usize,
    ) -> Result<()> {
        let keyword_scores = self.store.keyword_scores(collection, query, 4 * k)?;
        if keyword_scores.is_empty() {
            return Ok(());
        }

        let max_score = keyword_scores
            .values()
            .cloned()
            .fold(f32::MIN, f32::max)
            .max(f32::EPSILON);

        let weight = self.config.keyword_weight.clamp(0.0, 1.0);
        for hit in hits.iter_mut() {
            let keyword = keyword_scores.get(&hit.id).map_or(0.0, |s| s / max_score);
            hit.score = ((1.0 - weight) * hit.score + weight * keyword).clamp(0.0, 1.0);
        }
        Ok(())
    }
}

fn geo_accepts(compiled: &CompiledFilters, metadata: &Metadata) -> bool {
    let Some(geo) = &compiled.geo else {
        return true;
    };

    let lat = metadata.get("gps_lat").and_then(MetaValue::as_f64);
    let lon = metadata.get("gps_lon").and_then(MetaValue::as_f64);
    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            filters::haversine_km(geo.lat, geo.lon, lat, lon) <= geo.radius_km
        }
        _ => false,
    }
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_hits_breaks_ties_by_id() {
        let hit = |id: &str, score: f32| SearchHit {
            id: id.to_string(),
            score,
            distance: 1.0 - score,
            document: String::new(),
            metadata: Metadata::new(),
            collection: "messages".to_string(),
        };

        let mut hits = vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)];
        sort_hits(&mut hits);

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
