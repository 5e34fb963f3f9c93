mod batch;
mod http;
/// Embedding & Indexing
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - HttpEmbeddingProvider for OpenAI-compatible embedding services
/// - FastEmbedProvider for local embedding
/// - HNSW for vector similarity search
/// - Indexer for provider-sized batching into the knowledge-base store
mod provider;
mod vector_index;

pub use batch::{IndexError, IndexReport, Indexer};
pub use http::HttpEmbeddingProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{HnswParams, SearchResult, VectorIndex, VectorIndexError};

use crate::config::{EmbeddingConfig, RetrievalConfig};
use std::sync::Arc;

/// Build the embedding provider selected by configuration
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbeddingProvider::new(config)?)),
        "local" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

impl From<&RetrievalConfig> for HnswParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search: config.hnsw_ef_search,
        }
    }
}
