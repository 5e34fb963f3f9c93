//! Knowledge-base storage
//!
//! Each knowledge base is a directory under the knowledge root holding a
//! `manifest.json` and a sequence of zstd-compressed JSON-lines segments.
//! Segments are append-only: indexing writes a new segment (temp file then
//! rename) and updates the manifest, so earlier vectors are never rewritten.
//! Loading reads every segment and builds an in-memory HNSW index that is
//! cached and shared read-only between retrievals. Every append or delete
//! bumps the knowledge base's generation; a load only caches its index when
//! the generation it started from is still current.

mod segment;

pub use segment::{read_segment, write_segment};

use crate::chunker::Chunk;
use crate::embedding::{HnswParams, VectorIndex, VectorIndexError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Knowledge base not found: {0}")]
    NotFound(String),

    #[error("Knowledge base already exists: {0}")]
    AlreadyExists(String),

    #[error("Knowledge base {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Dimension mismatch in {id}: index has {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error("Vector index error: {0}")]
    Index(#[from] VectorIndexError),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// A chunk together with its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVector {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Persisted description of a knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseManifest {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Zero until the first vectors are appended
    pub dimension: usize,
    pub model: String,
    pub vector_count: usize,
    /// Segment file names in append order
    pub segments: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A fully loaded knowledge base ready for similarity search
pub struct LoadedIndex {
    manifest: KnowledgeBaseManifest,
    chunks: Vec<Chunk>,
    index: VectorIndex,
}

impl LoadedIndex {
    fn build(
        manifest: KnowledgeBaseManifest,
        vectors: Vec<IndexedVector>,
        params: HnswParams,
    ) -> Result<Self, StoreError> {
        let dimension = if manifest.dimension > 0 {
            manifest.dimension
        } else {
            vectors.first().map_or(0, |v| v.embedding.len())
        };

        let mut index = VectorIndex::new(dimension, vectors.len(), params);
        let mut chunks = Vec::with_capacity(vectors.len());
        for vector in vectors {
            index.insert(&vector.embedding)?;
            chunks.push(vector.chunk);
        }

        Ok(Self {
            manifest,
            chunks,
            index,
        })
    }

    pub fn manifest(&self) -> &KnowledgeBaseManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `k` chunks most similar to `query`, best first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&Chunk, f32)>, StoreError> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| self.chunks.get(hit.id).map(|chunk| (chunk, hit.score)))
            .collect())
    }
}

#[derive(Default)]
struct IndexCache {
    indices: HashMap<String, Arc<LoadedIndex>>,
    /// Never reset, so a load started before a delete cannot match afterwards
    generations: HashMap<String, u64>,
}

impl IndexCache {
    fn generation(&self, id: &str) -> u64 {
        self.generations.get(id).copied().unwrap_or(0)
    }

    fn invalidate(&mut self, id: &str) {
        self.indices.remove(id);
        *self.generations.entry(id.to_string()).or_insert(0) += 1;
    }
}

/// Directory-per-knowledge-base vector store
pub struct KnowledgeBaseStore {
    root: PathBuf,
    params: HnswParams,
    cache: RwLock<IndexCache>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KnowledgeBaseStore {
    /// Open (and create if needed) the store rooted at `root`
    pub fn open(root: impl Into<PathBuf>, params: HnswParams) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to create knowledge directory: {}", root.display()),
        })?;

        Ok(Self {
            root,
            params,
            cache: RwLock::new(IndexCache::default()),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kb_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        // Ids are used as directory names and must stay inside the root
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Create an empty knowledge base; names must be unique
    pub async fn create(
        &self,
        name: &str,
        categories: Vec<String>,
    ) -> Result<KnowledgeBaseManifest, StoreError> {
        if self.list()?.iter().any(|m| m.name == name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }

        let now = Utc::now();
        let manifest = KnowledgeBaseManifest {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
            dimension: 0,
            model: String::new(),
            vector_count: 0,
            segments: Vec::new(),
            categories,
        };

        let dir = self.kb_dir(&manifest.id)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to create knowledge base directory: {}", dir.display()),
        })?;
        write_manifest(&dir, &manifest)?;

        tracing::info!("Created knowledge base {} ({})", manifest.name, manifest.id);
        Ok(manifest)
    }

    /// All knowledge bases, oldest first; unreadable entries are skipped
    pub fn list(&self) -> Result<Vec<KnowledgeBaseManifest>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to read knowledge directory: {}", self.root.display()),
        })?;

        let mut manifests = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match read_manifest(&path) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(manifests)
    }

    pub fn manifest(&self, id: &str) -> Result<KnowledgeBaseManifest, StoreError> {
        let dir = self.kb_dir(id)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        read_manifest(&dir)
    }

    /// Remove a knowledge base and everything indexed into it
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.write_lock(id).await;
        let _guard = lock.lock().await;

        let dir = self.kb_dir(id)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| StoreError::Io {
            source: e,
            context: format!("Failed to delete knowledge base: {}", dir.display()),
        })?;

        self.cache.write().await.invalidate(id);
        self.write_locks.lock().await.remove(id);
        tracing::info!("Deleted knowledge base {}", id);
        Ok(())
    }

    async fn write_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist `vectors` as a new segment of knowledge base `id`
    ///
    /// Serialized per knowledge base; concurrent readers keep using the
    /// previously loaded index until the next load.
    pub async fn append(
        &self,
        id: &str,
        vectors: Vec<IndexedVector>,
        model: &str,
    ) -> Result<KnowledgeBaseManifest, StoreError> {
        let lock = self.write_lock(id).await;
        let _guard = lock.lock().await;

        let dir = self.kb_dir(id)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let mut manifest = read_manifest(&dir)?;

        if vectors.is_empty() {
            return Ok(manifest);
        }

        let expected = if manifest.dimension > 0 {
            manifest.dimension
        } else {
            vectors[0].embedding.len()
        };
        if let Some(bad) = vectors.iter().find(|v| v.embedding.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                id: id.to_string(),
                expected,
                actual: bad.embedding.len(),
            });
        }

        let segment_name = format!("segment-{:05}.jsonl.zst", manifest.segments.len());
        let count = vectors.len();
        let segment_path = dir.join(&segment_name);
        tokio::task::spawn_blocking(move || write_segment(&segment_path, &vectors))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        manifest.dimension = expected;
        if manifest.model.is_empty() {
            manifest.model = model.to_string();
        }
        manifest.vector_count += count;
        manifest.segments.push(segment_name);
        manifest.updated_at = Utc::now();
        write_manifest(&dir, &manifest)?;

        self.cache.write().await.invalidate(id);
        tracing::debug!(
            "Appended {} vectors to {} ({} total)",
            count,
            id,
            manifest.vector_count
        );
        Ok(manifest)
    }

    /// Load a knowledge base for search, reusing the cached index if present
    pub async fn load(&self, id: &str) -> Result<Arc<LoadedIndex>, StoreError> {
        let generation = {
            let cache = self.cache.read().await;
            if let Some(loaded) = cache.indices.get(id) {
                return Ok(Arc::clone(loaded));
            }
            cache.generation(id)
        };

        let dir = self.kb_dir(id)?;
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let params = self.params;
        let loaded = tokio::task::spawn_blocking(move || load_index(&dir, params))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        Ok(self.cache_if_current(id, generation, loaded).await)
    }

    /// Cache `loaded` unless `id` was appended to or deleted since
    /// `generation` was read
    async fn cache_if_current(
        &self,
        id: &str,
        generation: u64,
        loaded: LoadedIndex,
    ) -> Arc<LoadedIndex> {
        let loaded = Arc::new(loaded);
        let mut cache = self.cache.write().await;
        if cache.generation(id) == generation {
            cache.indices.insert(id.to_string(), Arc::clone(&loaded));
        } else {
            tracing::debug!("Knowledge base {} changed during load, not caching", id);
        }
        loaded
    }
}

fn load_index(dir: &Path, params: HnswParams) -> Result<LoadedIndex, StoreError> {
    let manifest = read_manifest(dir)?;

    let mut vectors = Vec::with_capacity(manifest.vector_count);
    for segment in &manifest.segments {
        let mut batch = read_segment(&dir.join(segment)).map_err(|e| StoreError::Corrupt {
            id: manifest.id.clone(),
            reason: format!("segment {}: {}", segment, e),
        })?;
        vectors.append(&mut batch);
    }

    if vectors.len() != manifest.vector_count {
        tracing::warn!(
            "Knowledge base {} manifest lists {} vectors, segments hold {}",
            manifest.id,
            manifest.vector_count,
            vectors.len()
        );
    }

    LoadedIndex::build(manifest, vectors, params)
}

fn read_manifest(dir: &Path) -> Result<KnowledgeBaseManifest, StoreError> {
    let path = dir.join(MANIFEST_FILE);
    let content = fs::read_to_string(&path).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to read manifest: {}", path.display()),
    })?;
    serde_json::from_str(&content).map_err(|e| StoreError::Json {
        source: e,
        context: format!("Failed to parse manifest: {}", path.display()),
    })
}

fn write_manifest(dir: &Path, manifest: &KnowledgeBaseManifest) -> Result<(), StoreError> {
    let path = dir.join(MANIFEST_FILE);
    let temp_path = dir.join(format!("{}.tmp", MANIFEST_FILE));
    let content = serde_json::to_string_pretty(manifest).map_err(|e| StoreError::Json {
        source: e,
        context: "Failed to serialize manifest".to_string(),
    })?;

    fs::write(&temp_path, content).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to write manifest: {}", temp_path.display()),
    })?;
    fs::rename(&temp_path, &path).map_err(|e| StoreError::Io {
        source: e,
        context: format!(
            "Failed to rename manifest into place: {} -> {}",
            temp_path.display(),
            path.display()
        ),
    })
}
