//! Retrieve-then-rerank pipeline shared by chat, the CLI and the HTTP API

use crate::chunker::DataType;
use crate::config::Config;
use crate::embedding::provider_from_config;
use crate::retrieval::{
    rerank_provider_from_config, RankedResult, RerankSettings, Reranker, RetrievalError,
    Retriever,
};
use crate::store::KnowledgeBaseStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Search query over a set of knowledge bases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query text
    pub query: String,

    /// Knowledge bases to search
    pub knowledge_base_ids: Vec<String>,

    /// Nearest neighbours pulled from each knowledge base
    pub top_k_per_kb: usize,

    /// Maximum number of results
    pub final_n: usize,

    /// Optional data type filter, applied before reranking
    #[serde(default)]
    pub data_type: Option<DataType>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, knowledge_base_ids: Vec<String>) -> Self {
        Self {
            query: query.into(),
            knowledge_base_ids,
            top_k_per_kb: 50,
            final_n: 5,
            data_type: None,
        }
    }
}

/// Runs the retriever and reranker as one step
pub struct Searcher {
    retriever: Retriever,
    reranker: Reranker,
}

impl Searcher {
    pub fn new(retriever: Retriever, reranker: Reranker) -> Self {
        Self {
            retriever,
            reranker,
        }
    }

    /// Assemble the pipeline selected by configuration
    ///
    /// A rerank provider that cannot be constructed is logged and replaced
    /// by similarity ordering.
    pub fn from_config(config: &Config, store: Arc<KnowledgeBaseStore>) -> crate::Result<Self> {
        let embedder = provider_from_config(&config.embedding)?;
        let retriever = Retriever::new(embedder, store, config.retrieval.max_concurrent_kbs);

        let rerank_provider = match rerank_provider_from_config(&config.rerank) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!("Reranking disabled: {}", e);
                None
            }
        };
        let reranker = Reranker::new(rerank_provider, RerankSettings::from(&config.rerank));

        Ok(Self::new(retriever, reranker))
    }

    /// Ranked passages for `request`; only a query-embedding failure errors
    pub async fn search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<RankedResult>, RetrievalError> {
        let mut candidates = self
            .retriever
            .retrieve(
                &request.query,
                &request.knowledge_base_ids,
                request.top_k_per_kb,
            )
            .await?;

        if let Some(data_type) = request.data_type {
            candidates.retain(|c| c.chunk.data_type == data_type);
        }

        let results = self
            .reranker
            .rerank(&request.query, candidates, request.final_n)
            .await;

        tracing::info!(
            "Search over {} knowledge bases returned {} results",
            request.knowledge_base_ids.len(),
            results.len()
        );
        Ok(results)
    }
}
