//! Parallel vector retrieval across knowledge bases

use crate::embedding::EmbeddingProvider;
use crate::retrieval::{deduplicate_candidates, RetrievalCandidate, RetrievalError};
use crate::store::KnowledgeBaseStore;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Pulls the nearest chunks for a query from several knowledge bases
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<KnowledgeBaseStore>,
    max_concurrent: usize,
}

impl Retriever {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<KnowledgeBaseStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Retrieve the top `top_k_per_kb` candidates from each knowledge base
    ///
    /// The query is embedded once. A knowledge base that fails to load or
    /// search is logged and skipped; if every one fails the result is empty.
    /// Only a query-embedding failure is returned as an error. Candidates
    /// come back grouped in `knowledge_base_ids` order, with no ordering
    /// across knowledge bases.
    pub async fn retrieve(
        &self,
        query: &str,
        knowledge_base_ids: &[String],
        top_k_per_kb: usize,
    ) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
        if knowledge_base_ids.is_empty() || top_k_per_kb == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .provider
            .embed(query)
            .await
            .map_err(|e| RetrievalError::QueryEmbedding(e.to_string()))?;
        let query_embedding = Arc::new(query_embedding);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (position, kb_id) in knowledge_base_ids.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let query_embedding = Arc::clone(&query_embedding);
            let kb_id = kb_id.clone();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        search_one(&store, &kb_id, &query_embedding, top_k_per_kb).await
                    }
                    Err(e) => Err(RetrievalError::KbLoadFailure {
                        id: kb_id.clone(),
                        reason: e.to_string(),
                    }),
                };
                (position, result)
            });
        }

        let mut per_kb: Vec<(usize, Vec<RetrievalCandidate>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, Ok(candidates))) => per_kb.push((position, candidates)),
                Ok((_, Err(e))) => tracing::warn!("Skipping knowledge base: {}", e),
                Err(e) => tracing::warn!("Knowledge base search task failed: {}", e),
            }
        }
        per_kb.sort_by_key(|(position, _)| *position);

        let candidates: Vec<RetrievalCandidate> = per_kb
            .into_iter()
            .flat_map(|(_, candidates)| candidates)
            .collect();

        tracing::debug!(
            "Retrieved {} candidates from {} knowledge bases",
            candidates.len(),
            knowledge_base_ids.len()
        );
        Ok(deduplicate_candidates(candidates))
    }
}

async fn search_one(
    store: &KnowledgeBaseStore,
    kb_id: &str,
    query_embedding: &[f32],
    top_k: usize,
) -> Result<Vec<RetrievalCandidate>, RetrievalError> {
    let failure = |e: crate::store::StoreError| RetrievalError::KbLoadFailure {
        id: kb_id.to_string(),
        reason: e.to_string(),
    };

    let loaded = store.load(kb_id).await.map_err(failure)?;
    let hits = loaded.search(query_embedding, top_k).map_err(failure)?;

    Ok(hits
        .into_iter()
        .map(|(chunk, score)| RetrievalCandidate {
            chunk: chunk.clone().with_knowledge_base(kb_id),
            raw_score: score,
        })
        .collect())
}
