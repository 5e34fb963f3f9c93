//! Cross-encoder reranking with similarity fallback and per-file diversity

use crate::config::RerankConfig;
use crate::retrieval::{HttpRerankProvider, RankedResult, RetrievalCandidate, ScoreSource};
use ahash::AHashMap;
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed rerank response: {0}")]
    MalformedResponse(String),

    #[error("Rerank timed out after {0:?}")]
    Timeout(Duration),
}

/// One scored document from a rerank call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    /// Position of the document in the request
    pub index: usize,
    pub relevance_score: f32,
}

/// A query-aware relevance model
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Score `documents` against `query`, returning at most `top_n` hits
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RerankError>;

    fn model_name(&self) -> &str;
}

/// Local cross-encoder via FastEmbed
pub struct FastEmbedReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl FastEmbedReranker {
    /// Create a new reranker with specified model
    ///
    /// # Arguments
    /// * `model_name` - "bge-reranker-base" or "bge-reranker-v2-m3"
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let reranker_model = match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" | "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported rerank model: {}. Supported: bge-reranker-base, bge-reranker-v2-m3",
                    model_name
                )))
            }
        };

        tracing::info!("Initializing local reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(reranker_model).with_show_download_progress(true);
        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait]
impl RerankProvider for FastEmbedReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = documents.to_vec();
        let results = tokio::task::spawn_blocking(move || {
            let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
            model.rerank(query.as_str(), docs, false, None)
        })
        .await
        .map_err(|e| RerankError::RerankingError(e.to_string()))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let mut hits: Vec<RerankHit> = results
            .into_iter()
            .map(|r| RerankHit {
                index: r.index,
                relevance_score: r.score,
            })
            .collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(top_n);
        Ok(hits)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Build the rerank provider selected by configuration, if enabled
pub fn rerank_provider_from_config(
    config: &RerankConfig,
) -> Result<Option<Arc<dyn RerankProvider>>, RerankError> {
    if !config.enabled {
        return Ok(None);
    }
    let provider: Arc<dyn RerankProvider> = match config.provider.as_str() {
        "http" => Arc::new(HttpRerankProvider::new(config)?),
        "local" => Arc::new(FastEmbedReranker::new(&config.model)?),
        other => {
            return Err(RerankError::InitializationError(format!(
                "Unknown rerank provider: {}",
                other
            )))
        }
    };
    Ok(Some(provider))
}

/// Tunables for [`Reranker`]
#[derive(Debug, Clone)]
pub struct RerankSettings {
    /// Provider ceiling on documents per call
    pub max_candidates: usize,
    /// Results requested from the model, and kept on fallback
    pub top_n: usize,
    /// Maximum results any single file may contribute
    pub per_file_cap: usize,
    pub timeout: Duration,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self::from(&RerankConfig::default())
    }
}

impl From<&RerankConfig> for RerankSettings {
    fn from(config: &RerankConfig) -> Self {
        Self {
            max_candidates: config.max_candidates.max(1),
            top_n: config.top_n.max(1),
            per_file_cap: config.per_file_cap.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Orders candidates by relevance and enforces source diversity
///
/// Never fails: without a provider, or when the provider errors, times out
/// or returns nothing usable, candidates are ordered by raw similarity.
pub struct Reranker {
    provider: Option<Arc<dyn RerankProvider>>,
    settings: RerankSettings,
}

impl Reranker {
    pub fn new(provider: Option<Arc<dyn RerankProvider>>, settings: RerankSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &RerankSettings {
        &self.settings
    }

    /// Best `final_n` candidates for `query`, ranked 1..n
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievalCandidate>,
        final_n: usize,
    ) -> Vec<RankedResult> {
        let mut candidates: Vec<RetrievalCandidate> = candidates
            .into_iter()
            .filter(|c| !c.chunk.text.trim().is_empty())
            .collect();

        if candidates.is_empty() || final_n == 0 {
            return Vec::new();
        }

        if candidates.len() > self.settings.max_candidates {
            tracing::warn!(
                "Candidate set of {} exceeds rerank ceiling, keeping the {} most similar",
                candidates.len(),
                self.settings.max_candidates
            );
            sort_by_raw_score(&mut candidates);
            candidates.truncate(self.settings.max_candidates);
        }

        let reranked = match &self.provider {
            Some(provider) => Some(self.call_provider(provider.as_ref(), query, &candidates).await),
            None => None,
        };

        let scored = match reranked {
            Some(Ok(hits)) => {
                let scored = remap_hits(hits, &candidates);
                if scored.is_empty() {
                    tracing::warn!("Rerank returned no usable results, using similarity order");
                    self.similarity_fallback(candidates)
                } else {
                    scored
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Rerank failed, using similarity order: {}", e);
                self.similarity_fallback(candidates)
            }
            None => self.similarity_fallback(candidates),
        };

        let diverse = cap_per_file(scored, self.settings.per_file_cap);

        diverse
            .into_iter()
            .take(final_n)
            .enumerate()
            .map(|(i, (chunk, relevance_score, scored_by))| RankedResult {
                chunk,
                relevance_score,
                rank: i + 1,
                scored_by,
            })
            .collect()
    }

    async fn call_provider(
        &self,
        provider: &dyn RerankProvider,
        query: &str,
        candidates: &[RetrievalCandidate],
    ) -> Result<Vec<RerankHit>, RerankError> {
        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let top_n = self.settings.top_n.min(documents.len());

        match tokio::time::timeout(
            self.settings.timeout,
            provider.rerank(query, &documents, top_n),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RerankError::Timeout(self.settings.timeout)),
        }
    }

    fn similarity_fallback(
        &self,
        mut candidates: Vec<RetrievalCandidate>,
    ) -> Vec<(crate::chunker::Chunk, f32, ScoreSource)> {
        sort_by_raw_score(&mut candidates);
        candidates
            .into_iter()
            .take(self.settings.top_n)
            .map(|c| (c.chunk, sanitize(c.raw_score), ScoreSource::Similarity))
            .collect()
    }
}

fn sanitize(score: f32) -> f32 {
    if score.is_nan() {
        f32::MIN
    } else {
        score
    }
}

fn sort_by_raw_score(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| sanitize(b.raw_score).total_cmp(&sanitize(a.raw_score)));
}

/// Map provider hits back onto candidates; bad or repeated indices are
/// logged and dropped
fn remap_hits(
    hits: Vec<RerankHit>,
    candidates: &[RetrievalCandidate],
) -> Vec<(crate::chunker::Chunk, f32, ScoreSource)> {
    let mut used = vec![false; candidates.len()];
    let mut scored = Vec::with_capacity(hits.len());

    for hit in hits {
        match used.get_mut(hit.index) {
            Some(taken) if !*taken => {
                if !hit.relevance_score.is_finite() {
                    tracing::warn!("Dropping rerank hit {} with non-finite score", hit.index);
                    continue;
                }
                *taken = true;
                scored.push((
                    candidates[hit.index].chunk.clone(),
                    hit.relevance_score,
                    ScoreSource::Rerank,
                ));
            }
            Some(_) => tracing::warn!("Dropping duplicate rerank index {}", hit.index),
            None => tracing::warn!(
                "Dropping rerank index {} out of range (0..{})",
                hit.index,
                candidates.len()
            ),
        }
    }

    scored
}

/// Keep each file's `cap` best results, sorted by score descending
fn cap_per_file(
    mut scored: Vec<(crate::chunker::Chunk, f32, ScoreSource)>,
    cap: usize,
) -> Vec<(crate::chunker::Chunk, f32, ScoreSource)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut per_file: AHashMap<String, usize> = AHashMap::new();
    scored
        .into_iter()
        .filter(|(chunk, _, _)| {
            let count = per_file.entry(chunk.file_name.clone()).or_insert(0);
            *count += 1;
            *count <= cap
        })
        .collect()
}
