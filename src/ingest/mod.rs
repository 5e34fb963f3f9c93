//! Building knowledge bases from category directories
//!
//! Each category is a directory of source files. Files are walked
//! recursively; hidden files, office lock files (`~$...`), empty files,
//! oversized files and files that are not valid UTF-8 are skipped with a
//! reason. Every remaining file becomes one [`Document`] that is chunked and
//! handed to the [`Indexer`].

use crate::chunker::{Chunk, Chunker, DataType, Document};
use crate::config::{expand_path, Config};
use crate::embedding::{provider_from_config, IndexError, Indexer};
use crate::store::{KnowledgeBaseStore, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("No readable category directories among: {0}")]
    NoSources(String),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Ingest task failed: {0}")]
    Task(String),
}

/// A file left out of a knowledge base, and why
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of an ingest run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub knowledge_base_id: String,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub vector_count: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Source directory resolved to a category name
#[derive(Debug, Clone)]
struct CategorySource {
    category: String,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct Scan {
    documents: Vec<Document>,
    skipped: Vec<SkippedFile>,
}

/// Reads category directories into knowledge bases
pub struct Ingestor {
    chunker: Chunker,
    indexer: Indexer,
    store: Arc<KnowledgeBaseStore>,
    category_root: PathBuf,
    max_file_size: u64,
}

impl Ingestor {
    pub fn new(
        chunker: Chunker,
        indexer: Indexer,
        store: Arc<KnowledgeBaseStore>,
        category_root: PathBuf,
        max_file_size: u64,
    ) -> Self {
        Self {
            chunker,
            indexer,
            store,
            category_root,
            max_file_size,
        }
    }

    pub fn from_config(config: &Config, store: Arc<KnowledgeBaseStore>) -> crate::Result<Self> {
        let provider = provider_from_config(&config.embedding)?;
        let indexer = Indexer::new(
            provider,
            Arc::clone(&store),
            config.embedding.batch_size,
            config.embedding.max_concurrent,
        );
        Ok(Self::new(
            Chunker::from_config(&config.chunking),
            indexer,
            store,
            expand_path(&config.storage.category_dir)?,
            config.max_file_size_bytes()?,
        ))
    }

    /// Create knowledge base `name` from category directories
    ///
    /// A category is either a path or a directory name under the configured
    /// category root; missing ones are skipped. If indexing fails the new
    /// knowledge base is removed again.
    pub async fn create_from_categories(
        &self,
        name: &str,
        categories: &[PathBuf],
        data_type: DataType,
    ) -> Result<IngestReport, IngestError> {
        let sources = self.resolve_categories(categories);
        if sources.is_empty() {
            let listed: Vec<String> = categories.iter().map(|p| p.display().to_string()).collect();
            return Err(IngestError::NoSources(listed.join(", ")));
        }

        let manifest = self
            .store
            .create(name, sources.iter().map(|s| s.category.clone()).collect())
            .await?;

        match self.ingest(&manifest.id, sources, data_type).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!("Removing knowledge base {} after failed ingest", manifest.id);
                if let Err(cleanup) = self.store.delete(&manifest.id).await {
                    warn!("Failed to remove knowledge base {}: {}", manifest.id, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Append files (or directories of files) to an existing knowledge base
    /// under `category`
    pub async fn add_files(
        &self,
        knowledge_base_id: &str,
        paths: &[PathBuf],
        category: &str,
        data_type: DataType,
    ) -> Result<IngestReport, IngestError> {
        self.store.manifest(knowledge_base_id)?;

        let sources = paths
            .iter()
            .map(|path| CategorySource {
                category: category.to_string(),
                path: path.clone(),
            })
            .collect();
        self.ingest(knowledge_base_id, sources, data_type).await
    }

    async fn ingest(
        &self,
        knowledge_base_id: &str,
        sources: Vec<CategorySource>,
        data_type: DataType,
    ) -> Result<IngestReport, IngestError> {
        let max_file_size = self.max_file_size;
        let kb_id = knowledge_base_id.to_string();
        let scan = tokio::task::spawn_blocking(move || {
            scan_sources(&sources, &kb_id, data_type, max_file_size)
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;

        for skipped in &scan.skipped {
            warn!("Skipping {}: {}", skipped.path.display(), skipped.reason);
        }

        let chunks: Vec<Chunk> = scan
            .documents
            .iter()
            .flat_map(|document| self.chunker.chunk_document(document))
            .collect();

        let files_indexed = scan.documents.len();
        let indexed = self.indexer.index(chunks, knowledge_base_id).await;
        let (chunks_indexed, vector_count) = match indexed {
            Ok(report) => (report.indexed, report.vector_count),
            Err(IndexError::NoContent) => {
                warn!("Nothing to index for {}", knowledge_base_id);
                (0, self.store.manifest(knowledge_base_id)?.vector_count)
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Ingested {} files ({} chunks) into {}, skipped {}",
            files_indexed,
            chunks_indexed,
            knowledge_base_id,
            scan.skipped.len()
        );

        Ok(IngestReport {
            knowledge_base_id: knowledge_base_id.to_string(),
            files_indexed: if chunks_indexed == 0 { 0 } else { files_indexed },
            chunks_indexed,
            vector_count,
            skipped: scan.skipped,
        })
    }

    fn resolve_categories(&self, categories: &[PathBuf]) -> Vec<CategorySource> {
        let mut sources = Vec::new();
        for category in categories {
            let path = if category.is_dir() {
                category.clone()
            } else {
                self.category_root.join(category)
            };
            if !path.is_dir() {
                warn!("Category directory does not exist: {}", path.display());
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| category.display().to_string());
            sources.push(CategorySource {
                category: name,
                path,
            });
        }
        sources
    }
}

fn is_hidden_or_lock(entry: &DirEntry) -> bool {
    // The walk root itself is never filtered
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || name.starts_with("~$"))
            .unwrap_or(false)
}

fn scan_sources(
    sources: &[CategorySource],
    knowledge_base_id: &str,
    data_type: DataType,
    max_file_size: u64,
) -> Result<Scan, IngestError> {
    let mut scan = Scan::default();

    for source in sources {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&source.path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden_or_lock(e))
        {
            let entry = entry.map_err(|e| IngestError::Walk {
                path: source.path.clone(),
                source: e,
            })?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }

        for path in paths {
            match read_source(&path, max_file_size) {
                Ok(text) => scan.documents.push(Document {
                    text,
                    source_file_name: file_name(&path),
                    category: source.category.clone(),
                    knowledge_base_id: knowledge_base_id.to_string(),
                    data_type,
                }),
                Err(reason) => scan.skipped.push(SkippedFile { path, reason }),
            }
        }
    }

    Ok(scan)
}

fn read_source(path: &Path, max_file_size: u64) -> Result<String, String> {
    let size = std::fs::metadata(path).map_err(|e| e.to_string())?.len();
    if size > max_file_size {
        return Err(format!(
            "file too large ({:.2} MB)",
            size as f64 / (1024.0 * 1024.0)
        ));
    }

    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let text = String::from_utf8(bytes).map_err(|_| "not UTF-8 text".to_string())?;
    if text.trim().is_empty() {
        return Err("empty file".to_string());
    }
    Ok(text)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
