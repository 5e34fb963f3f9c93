//! In-process fakes for the embedding, rerank and completion services
#![allow(dead_code)]

use async_trait::async_trait;
use docent::chat::{ChatService, SessionSettings};
use docent::chunker::{Chunk, DataType};
use docent::embedding::{EmbeddingError, EmbeddingProvider, HnswParams, Indexer};
use docent::llm::{
    CompletionDelta, CompletionError, CompletionProvider, CompletionRequest, DeltaStream,
};
use docent::retrieval::{
    RerankError, RerankHit, RerankProvider, RerankSettings, Reranker, Retriever, Searcher,
};
use docent::store::KnowledgeBaseStore;
use futures_util::StreamExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIM: usize = 32;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedding: texts sharing words point the same way
pub struct BagOfWordsEmbedder;

impl BagOfWordsEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[DIM - 1] = 0.05;
        for word in words(text) {
            let bucket = blake3::hash(word.as_bytes()).as_bytes()[0] as usize % (DIM - 1);
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }
}

/// Embedding service that is always down
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable {
            attempts: 3,
            reason: "connection refused".to_string(),
        })
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

/// Scores documents by the fraction of query words they contain
pub struct OverlapReranker;

#[async_trait]
impl RerankProvider for OverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        let query_words: Vec<String> = words(query).collect();
        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_words: Vec<String> = words(doc).collect();
                let matched = query_words.iter().filter(|w| doc_words.contains(w)).count();
                RerankHit {
                    index,
                    relevance_score: matched as f32 / query_words.len().max(1) as f32,
                }
            })
            .collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(top_n);
        Ok(hits)
    }

    fn model_name(&self) -> &str {
        "overlap"
    }
}

/// Rerank service that never answers in time
pub struct StalledReranker(pub Duration);

#[async_trait]
impl RerankProvider for StalledReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[String],
        _top_n: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        tokio::time::sleep(self.0).await;
        Ok(Vec::new())
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

/// How a scripted completion misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionFault {
    None,
    /// The request is rejected before streaming starts
    Rejected,
    /// The stream breaks after this many deltas
    BreaksAfter(usize),
}

/// Completion service replaying fixed deltas and recording requests
pub struct ScriptedCompletion {
    deltas: Vec<CompletionDelta>,
    fault: CompletionFault,
    delay: Duration,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn answering(parts: &[&str]) -> Self {
        Self::new(
            parts
                .iter()
                .map(|p| CompletionDelta {
                    reasoning: None,
                    content: Some(p.to_string()),
                })
                .collect(),
        )
    }

    pub fn new(deltas: Vec<CompletionDelta>) -> Self {
        Self {
            deltas,
            fault: CompletionFault::None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fault(mut self, fault: CompletionFault) -> Self {
        self.fault = fault;
        self
    }

    /// Pause before every delta
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, CompletionError> {
        self.requests.lock().unwrap().push(request);

        if self.fault == CompletionFault::Rejected {
            return Err(CompletionError::Status {
                status: 401,
                body: "invalid api key".to_string(),
            });
        }

        let mut items: Vec<Result<CompletionDelta, CompletionError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        if let CompletionFault::BreaksAfter(n) = self.fault {
            items.truncate(n);
            items.push(Err(CompletionError::Network("connection reset".to_string())));
        }

        let delay = self.delay;
        Ok(futures_util::stream::iter(items)
            .then(move |item| async move {
                tokio::time::sleep(delay).await;
                item
            })
            .boxed())
    }
}

pub fn open_store(root: &Path) -> Arc<KnowledgeBaseStore> {
    Arc::new(KnowledgeBaseStore::open(root, HnswParams::default()).unwrap())
}

/// Create a knowledge base with one passage per (category, file name, text)
pub async fn build_kb(
    store: &Arc<KnowledgeBaseStore>,
    name: &str,
    passages: &[(&str, &str, &str)],
) -> String {
    let mut categories: Vec<String> = passages.iter().map(|(c, _, _)| c.to_string()).collect();
    categories.dedup();
    let manifest = store.create(name, categories).await.unwrap();

    let chunks = passages
        .iter()
        .enumerate()
        .map(|(index, (category, file, text))| {
            Chunk::new(
                text.to_string(),
                index,
                manifest.id.clone(),
                category.to_string(),
                file.to_string(),
                DataType::Unstructured,
            )
        })
        .collect();

    let indexer = Indexer::new(Arc::new(BagOfWordsEmbedder), Arc::clone(store), 8, 2);
    indexer.index(chunks, &manifest.id).await.unwrap();
    manifest.id
}

/// Overwrite every segment of a knowledge base with garbage
pub fn corrupt_kb(store: &KnowledgeBaseStore, id: &str) {
    let manifest = store.manifest(id).unwrap();
    for segment in manifest.segments {
        std::fs::write(store.root().join(id).join(segment), b"not a segment").unwrap();
    }
}

pub fn searcher(
    store: &Arc<KnowledgeBaseStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn RerankProvider>>,
    settings: RerankSettings,
) -> Arc<Searcher> {
    Arc::new(Searcher::new(
        Retriever::new(embedder, Arc::clone(store), 4),
        Reranker::new(reranker, settings),
    ))
}

pub fn chat_service(
    searcher: Arc<Searcher>,
    standard: Arc<ScriptedCompletion>,
    reasoning: Option<Arc<ScriptedCompletion>>,
) -> Arc<ChatService> {
    Arc::new(ChatService::new(
        searcher,
        standard,
        reasoning.map(|r| r as Arc<dyn CompletionProvider>),
        SessionSettings::default(),
    ))
}
