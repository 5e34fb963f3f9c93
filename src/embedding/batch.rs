/// Indexer: embeds chunks in provider-sized batches and persists them
use super::{EmbeddingError, EmbeddingProvider};
use crate::chunker::Chunk;
use crate::store::{IndexedVector, KnowledgeBaseStore, StoreError};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum IndexError {
    /// The embedding service could not complete a batch after retries
    #[error("Embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    /// Nothing to index; callers should treat this as a no-op
    #[error("No content to index")]
    NoContent,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EmbeddingError> for IndexError {
    fn from(e: EmbeddingError) -> Self {
        IndexError::EmbeddingServiceUnavailable(e.to_string())
    }
}

/// Result of one indexing run
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub knowledge_base_id: String,
    pub indexed: usize,
    /// Blank chunks dropped before embedding
    pub skipped: usize,
    pub batches: usize,
    pub vector_count: usize,
    pub duration_ms: u64,
}

/// Embeds chunks and appends them to a knowledge base
///
/// Requests to the embedding service never exceed `batch_size` texts. Up to
/// `max_concurrent` batches are in flight at once; results keep input order.
/// Nothing is persisted unless every batch succeeds.
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<KnowledgeBaseStore>,
    batch_size: usize,
    max_concurrent: usize,
}

impl Indexer {
    /// Create a new indexer
    ///
    /// # Arguments
    /// * `provider` - Embedding provider
    /// * `store` - Knowledge-base store receiving the vectors
    /// * `batch_size` - Provider ceiling on texts per request
    /// * `max_concurrent` - Maximum embedding requests in flight
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<KnowledgeBaseStore>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            store,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Embed `chunks` and append them to knowledge base `knowledge_base_id`
    pub async fn index(
        &self,
        chunks: Vec<Chunk>,
        knowledge_base_id: &str,
    ) -> Result<IndexReport, IndexError> {
        let start = std::time::Instant::now();

        let total = chunks.len();
        let chunks: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(|c| c.with_knowledge_base(knowledge_base_id))
            .collect();
        let skipped = total - chunks.len();

        if chunks.is_empty() {
            return Err(IndexError::NoContent);
        }

        info!(
            "Indexing {} chunks into {} ({} per batch)",
            chunks.len(),
            knowledge_base_id,
            self.batch_size
        );

        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(self.batch_size)
            .map(<[Chunk]>::to_vec)
            .collect();
        let batch_count = batches.len();

        let embedded: Vec<Vec<IndexedVector>> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;
        let vectors: Vec<IndexedVector> = embedded.into_iter().flatten().collect();
        let indexed = vectors.len();

        let manifest = self
            .store
            .append(knowledge_base_id, vectors, self.provider.model_name())
            .await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexed {} chunks into {} in {}ms ({} vectors total)",
            indexed, knowledge_base_id, duration_ms, manifest.vector_count
        );

        Ok(IndexReport {
            knowledge_base_id: knowledge_base_id.to_string(),
            indexed,
            skipped,
            batches: batch_count,
            vector_count: manifest.vector_count,
            duration_ms,
        })
    }

    async fn embed_batch(&self, batch: Vec<Chunk>) -> Result<Vec<IndexedVector>, IndexError> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.provider.embed_batch(&texts).await?;

        if embeddings.len() != batch.len() {
            return Err(IndexError::EmbeddingServiceUnavailable(format!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                embeddings.len()
            )));
        }

        debug!("Embedded batch of {} chunks", batch.len());
        Ok(batch
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedVector { chunk, embedding })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::DataType;
    use crate::embedding::HnswParams;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Records the largest batch it was asked to embed
    struct RecordingProvider {
        largest_batch: AtomicUsize,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.largest_batch.fetch_max(texts.len(), Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::Unavailable {
                    attempts: 3,
                    reason: "503".to_string(),
                });
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.5])
                .collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| {
                Chunk::new(
                    format!("passage number {}", i),
                    i,
                    "",
                    "notes",
                    "lecture.md",
                    DataType::Unstructured,
                )
            })
            .collect()
    }

    async fn setup(fail: bool) -> (Indexer, Arc<RecordingProvider>, String, TempDir) {
        let temp = TempDir::new().unwrap();
        let store =
            Arc::new(KnowledgeBaseStore::open(temp.path(), HnswParams::default()).unwrap());
        let kb = store.create("lectures", vec![]).await.unwrap();
        let provider = Arc::new(RecordingProvider {
            largest_batch: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail,
        });
        let indexer = Indexer::new(provider.clone(), store, 8, 2);
        (indexer, provider, kb.id, temp)
    }

    #[tokio::test]
    async fn test_sub_batches_respect_ceiling() {
        let (indexer, provider, kb_id, _temp) = setup(false).await;

        let report = indexer.index(chunks(21), &kb_id).await.unwrap();
        assert_eq!(report.indexed, 21);
        assert_eq!(report.batches, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(provider.largest_batch.load(Ordering::SeqCst) <= 8);

        // Incremental: a second run appends without re-embedding the first
        let report = indexer.index(chunks(2), &kb_id).await.unwrap();
        assert_eq!(report.vector_count, 23);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_input_is_no_content() {
        let (indexer, provider, kb_id, _temp) = setup(false).await;

        assert!(matches!(
            indexer.index(Vec::new(), &kb_id).await,
            Err(IndexError::NoContent)
        ));

        let mut blank = chunks(1);
        blank[0].text = "   \n".to_string();
        assert!(matches!(
            indexer.index(blank, &kb_id).await,
            Err(IndexError::NoContent)
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_failure_persists_nothing() {
        let (indexer, _provider, kb_id, _temp) = setup(true).await;

        let result = indexer.index(chunks(5), &kb_id).await;
        assert!(matches!(
            result,
            Err(IndexError::EmbeddingServiceUnavailable(_))
        ));
        assert_eq!(indexer.store.manifest(&kb_id).unwrap().vector_count, 0);
    }

    #[tokio::test]
    async fn test_chunks_stamped_with_kb() {
        let (indexer, _provider, kb_id, _temp) = setup(false).await;
        indexer.index(chunks(2), &kb_id).await.unwrap();

        let loaded = indexer.store.load(&kb_id).await.unwrap();
        let hits = loaded.search(&[16.0, 1.0, 0.5], 2).unwrap();
        assert!(hits.iter().all(|(c, _)| c.knowledge_base_id == kb_id));
    }
}
