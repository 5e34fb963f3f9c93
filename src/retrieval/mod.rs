//! Multi-knowledge-base retrieval and reranking
//!
//! Vector search runs per knowledge base and the candidates are merged into
//! one flat set; a cross-encoder reranker then scores them against the query,
//! falls back to raw similarity when it cannot, and caps how many passages a
//! single source file may contribute.

mod deduplication;
mod provenance;
mod rerank_http;
mod reranker;
mod retriever;
mod searcher;

pub use deduplication::deduplicate_candidates;
pub use provenance::{SourceEntry, SourceTree};
pub use rerank_http::HttpRerankProvider;
pub use reranker::{
    rerank_provider_from_config, FastEmbedReranker, RerankError, RerankHit, RerankProvider,
    RerankSettings, Reranker,
};
pub use retriever::Retriever;
pub use searcher::{SearchRequest, Searcher};

use crate::chunker::Chunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// One knowledge base could not be searched; the others still are
    #[error("Failed to load knowledge base {id}: {reason}")]
    KbLoadFailure { id: String, reason: String },

    /// The query itself could not be embedded
    #[error("Failed to embed query: {0}")]
    QueryEmbedding(String),
}

/// A vector-search hit, before reranking
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    /// Cosine similarity against the query
    pub raw_score: f32,
}

/// Which scoring path produced a relevance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    /// Cross-encoder relevance from the rerank service
    Rerank,
    /// Raw vector similarity (rerank disabled or failed)
    Similarity,
}

/// A passage selected for the final answer context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk: Chunk,
    pub relevance_score: f32,
    /// 1-based; scores never increase with rank
    pub rank: usize,
    pub scored_by: ScoreSource,
}
