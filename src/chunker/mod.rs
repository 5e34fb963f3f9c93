//! Document chunking
//!
//! Turns an uploaded document into bounded, structurally coherent chunks
//! that carry their provenance (knowledge base, category, file, data type).

mod markdown;

pub use markdown::{split_markdown, ChunkLimits, MAX_CHUNK_BYTES};

use crate::config::ChunkingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a source document is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Tabular sources, one record per line
    Structured,
    /// Prose and Markdown
    Unstructured,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Structured => write!(f, "structured"),
            DataType::Unstructured => write!(f, "unstructured"),
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" => Ok(DataType::Structured),
            "unstructured" => Ok(DataType::Unstructured),
            other => Err(format!(
                "Unknown data type '{}': expected 'structured' or 'unstructured'",
                other
            )),
        }
    }
}

/// An uploaded source document
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source_file_name: String,
    pub category: String,
    pub knowledge_base_id: String,
    pub data_type: DataType,
}

/// A bounded unit of text with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `<file_name>_<index>_<content hash prefix>`
    pub id: String,
    pub text: String,
    /// Empty until the chunk is assigned to a knowledge base
    #[serde(default)]
    pub knowledge_base_id: String,
    pub category: String,
    pub file_name: String,
    pub data_type: DataType,
    pub has_image: bool,
    pub has_code: bool,
}

impl Chunk {
    /// Build a chunk from split text, deriving its id and feature flags
    pub fn new(
        text: String,
        index: usize,
        knowledge_base_id: impl Into<String>,
        category: impl Into<String>,
        file_name: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        let file_name = file_name.into();
        let hash = blake3::hash(text.as_bytes()).to_hex();
        Self {
            id: format!("{}_{}_{}", file_name, index, &hash.as_str()[..8]),
            has_image: detect_has_image(&text),
            has_code: detect_has_code(&text),
            text,
            knowledge_base_id: knowledge_base_id.into(),
            category: category.into(),
            file_name,
            data_type,
        }
    }

    /// Same chunk attributed to `knowledge_base_id` when it carries none
    pub fn with_knowledge_base(mut self, knowledge_base_id: &str) -> Self {
        if self.knowledge_base_id.is_empty() {
            self.knowledge_base_id = knowledge_base_id.to_string();
        }
        self
    }
}

/// Image markers found in converted documents
pub fn detect_has_image(text: &str) -> bool {
    ["![", "<img", "! [", "图像："]
        .iter()
        .any(|marker| text.contains(marker))
}

pub fn detect_has_code(text: &str) -> bool {
    text.contains("```")
}

/// Split `text` with limits derived from `max_chunk_bytes`
pub fn split(text: &str, max_chunk_bytes: usize) -> Vec<String> {
    split_markdown(text, &ChunkLimits::for_max(max_chunk_bytes))
}

/// One chunk per non-empty line; lines above `ceiling` are hard-split
pub fn split_structured(text: &str, ceiling: usize) -> Vec<String> {
    let ceiling = ceiling.max(1);
    let mut chunks = Vec::new();
    for line in text.lines() {
        let mut rest = line.trim();
        while rest.len() > ceiling {
            let cut = markdown::hard_split_point(rest, ceiling);
            chunks.push(rest[..cut].trim_end().to_string());
            rest = rest[cut..].trim_start();
        }
        if !rest.is_empty() {
            chunks.push(rest.to_string());
        }
    }
    chunks
}

/// Splits documents according to their data type
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    limits: ChunkLimits,
}

impl Chunker {
    pub fn new(limits: ChunkLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(ChunkLimits::new(
            config.max_chunk_bytes,
            config.heading_headroom,
            config.merge_ceiling,
        ))
    }

    pub fn limits(&self) -> &ChunkLimits {
        &self.limits
    }

    /// Split raw text as prose/Markdown
    pub fn split(&self, text: &str) -> Vec<String> {
        split_markdown(text, &self.limits)
    }

    /// Chunk a document, stamping every chunk with the document's provenance
    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        let pieces = match document.data_type {
            DataType::Unstructured => self.split(&document.text),
            DataType::Structured => split_structured(&document.text, self.limits.merge_ceiling),
        };

        tracing::debug!(
            "Split {} into {} chunks ({})",
            document.source_file_name,
            pieces.len(),
            document.data_type
        );

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, text)| {
                Chunk::new(
                    text,
                    index,
                    document.knowledge_base_id.clone(),
                    document.category.clone(),
                    document.source_file_name.clone(),
                    document.data_type,
                )
            })
            .collect()
    }
}
