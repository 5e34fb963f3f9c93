/// Embedding provider trait and FastEmbed implementation
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("API key not set: {0}")]
    MissingApiKey(String),

    #[error("Embedding service unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
}

/// Trait for embedding providers
///
/// Allows abstraction over remote embedding services and local models.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for multiple texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Runs entirely offline once the model is cached. Inference is CPU-bound
/// and runs on the blocking thread pool.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// **Important**: Models are downloaded on-demand to the fastembed cache
    /// on first use:
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - bge-small-en-v1.5: 130MB (384 dims)
    /// - bge-base-en-v1.5: 440MB (768 dims)
    /// - bge-small-zh-v1.5: 95MB (512 dims), for Chinese material
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            "bge-small-zh-v1.5" => (EmbeddingModel::BGESmallZHV15, 512),
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-small-zh-v1.5",
                    model_name
                )));
            }
        };

        tracing::info!(
            "Initializing local embedding model: {} ({}D, downloaded if not cached)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);
        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        check_dimensions(&embeddings, self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Verify every embedding has the expected length
pub(crate) fn check_dimensions(
    embeddings: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingError> {
    match embeddings.iter().find(|e| e.len() != expected) {
        Some(bad) => Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_model() {
        assert!(matches!(
            FastEmbedProvider::new("word2vec"),
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(&[vec![0.0; 3], vec![1.0; 3]], 3).is_ok());
        assert!(matches!(
            check_dimensions(&[vec![0.0; 3], vec![1.0; 2]], 3),
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_batch_embedding() {
        let provider = FastEmbedProvider::new("all-MiniLM-L6-v2").unwrap();
        let texts = vec![
            "Photosynthesis happens in chloroplasts.".to_string(),
            "Newton's second law relates force and mass.".to_string(),
        ];

        let embeddings = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|e| e.len() == 384));
    }

    #[tokio::test]
    #[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
    async fn test_empty_text() {
        let provider = FastEmbedProvider::new("all-MiniLM-L6-v2").unwrap();
        assert!(provider.embed("").await.is_err());
    }
}
