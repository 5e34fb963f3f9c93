use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::{EmbeddingError, IndexError};
use crate::ingest::IngestError;
use crate::llm::CompletionError;
use crate::retrieval::{RerankError, RetrievalError};
use crate::store::StoreError;

/// Main error type for docent
#[derive(Error, Debug)]
pub enum DocentError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Knowledge base storage errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Indexing errors
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Retrieval errors that could not be absorbed
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Knowledge-base ingest errors
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Embedding provider construction errors
    #[error("Embedding provider error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Rerank provider construction errors
    #[error("Rerank provider error: {0}")]
    Rerank(#[from] RerankError),

    /// Completion client errors
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for docent operations
pub type Result<T> = std::result::Result<T, DocentError>;
