//! HNSW graph for approximate nearest neighbor search
//!
//! The graph is derived state: it is built lazily from the raw vectors in the
//! segment file and updated incrementally on upsert. It is never loaded from
//! disk, so a corrupt or missing graph is always recoverable by a rebuild.

use crate::error::{Result, TrawlError};
use hnsw_rs::prelude::*;
use std::sync::RwLock;

/// A neighbor returned by the graph, addressed by segment slot
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub slot: u64,
    /// Cosine distance normalized to [0, 1]
    pub distance: f32,
}

/// HNSW parameters, fixed at graph construction
#[derive(Debug, Clone, Copy)]
pub struct AnnParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for AnnParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// In-memory ANN graph over one collection's vectors
pub struct AnnIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    dimension: usize,
    params: AnnParams,
    count: RwLock<usize>,
}

impl AnnIndex {
    /// Create an empty graph
    ///
    /// `capacity` is a sizing hint for the layer structure; inserts beyond it
    /// are still accepted.
    pub fn new(dimension: usize, capacity: usize, params: AnnParams) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            capacity.max(1024),
            16, // max layers
            params.ef_construction,
            DistCosine,
        );

        Self {
            index: RwLock::new(index),
            dimension,
            params,
            count: RwLock::new(0),
        }
    }

    /// Insert a vector keyed by its segment slot
    pub fn insert(&self, slot: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(TrawlError::DimensionMismatch {
                collection: String::new(),
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let data = vector.to_vec();

        let index = self.index.write().unwrap();
        index.insert((&data, slot as usize));
        drop(index);

        let mut count = self.count.write().unwrap();
        *count += 1;

        Ok(())
    }

    /// Insert multiple vectors in batch
    pub fn insert_batch(&self, items: &[(u64, Vec<f32>)]) -> Result<()> {
        for (slot, vector) in items {
            self.insert(*slot, vector)?;
        }
        Ok(())
    }

    /// Search for the k nearest neighbors of a query vector
    ///
    /// Results are sorted by ascending distance. Distances are cosine
    /// distances rescaled to [0, 1] so that orthogonal vectors sit at 0.5.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(TrawlError::DimensionMismatch {
                collection: String::new(),
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let index = self.index.read().unwrap();
        let ef = self.params.ef_search.max(k);
        let results = index.search(query, k, ef);

        Ok(results
            .into_iter()
            .map(|neighbor| Neighbor {
                slot: neighbor.d_id as u64,
                // hnsw_rs DistCosine yields 1 - cos in [0, 2]
                distance: (neighbor.distance / 2.0).clamp(0.0, 1.0),
            })
            .collect())
    }

    /// Number of points in the graph (stale slots included)
    pub fn len(&self) -> usize {
        *self.count.read().unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine distance between two raw vectors, rescaled to [0, 1]
///
/// Zero-magnitude inputs are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    let cos = (dot / (mag_a * mag_b)).clamp(-1.0, 1.0);
    ((1.0 - cos) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_search() {
        let index = AnnIndex::new(8, 1024, AnnParams::default());

        index.insert(0, &basis(8, 0)).unwrap();
        index.insert(1, &basis(8, 1)).unwrap();
        let mut close = basis(8, 0);
        close[1] = 0.1;
        index.insert(2, &close).unwrap();

        assert_eq!(index.len(), 3);

        let results = index.search(&basis(8, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].slot, 0);
        assert!(results[0].distance < 1e-4);
        assert_eq!(results[1].slot, 2);
    }

    #[test]
    fn test_dimension_validation() {
        let index = AnnIndex::new(8, 1024, AnnParams::default());
        assert!(index.insert(0, &[1.0, 0.0]).is_err());
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_cosine_distance_scale() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [-1.0, 0.0];

        assert!(cosine_distance(&a, &a).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 0.5).abs() < 1e-6);
        assert!((cosine_distance(&a, &c) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&a, &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_search_distance_matches_exact() {
        let index = AnnIndex::new(4, 1024, AnnParams::default());
        let a = vec![1.0, 0.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0, 0.0];
        index.insert(0, &a).unwrap();
        index.insert(1, &b).unwrap();

        let results = index.search(&a, 2).unwrap();
        let exact: Vec<f32> = vec![cosine_distance(&a, &a), cosine_distance(&a, &b)];
        assert!((results[0].distance - exact[0]).abs() < 1e-4);
        assert!((results[1].distance - exact[1]).abs() < 1e-4);
    }
}
