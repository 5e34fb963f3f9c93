/// HNSW vector index for similarity search
use hnsw_rs::prelude::*;
use thiserror::Error;

/// Upper bound on HNSW layers
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index capacity exceeded: {capacity}")]
    CapacityExceeded { capacity: usize },
}

/// HNSW construction and search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per layer
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

/// Search result with ID and similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Position of the vector in insertion order
    pub id: usize,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

/// In-memory HNSW index over cosine distance
///
/// Built once from the persisted vectors of a knowledge base and then only
/// read; ids are the positions of the vectors in load order.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    capacity: usize,
    count: usize,
    params: HnswParams,
}

impl VectorIndex {
    /// Create an empty index sized for `capacity` vectors
    pub fn new(dimension: usize, capacity: usize, params: HnswParams) -> Self {
        let capacity = capacity.max(1);
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            capacity,
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Self {
            index,
            dimension,
            capacity,
            count: 0,
            params,
        }
    }

    /// Insert a vector under the next sequential id
    pub fn insert(&mut self, vector: &[f32]) -> Result<usize, VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if self.count >= self.capacity {
            return Err(VectorIndexError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let id = self.count;
        self.index.insert((vector, id));
        self.count += 1;
        Ok(id)
    }

    /// Search for the k nearest neighbors, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.count == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let k = k.min(self.count);
        let ef = self.params.ef_search.max(k);

        let mut results: Vec<SearchResult> = self
            .index
            .search(query, k, ef)
            .into_iter()
            .filter(|neighbor| neighbor.distance.is_finite())
            .map(|neighbor| SearchResult {
                id: neighbor.d_id,
                score: 1.0 - neighbor.distance, // Convert distance to similarity
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
