//! Configuration management for docent
//!
//! Configuration is a single TOML file. Every section has defaults so a
//! partial file is valid; values can be overridden per profile and through
//! `DOCENT_SECTION__KEY` environment variables.

use crate::error::{DocentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: current_timestamp(),
            last_modified: current_timestamp(),
        }
    }
}

/// Where knowledge bases and their source categories live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One sub-directory per knowledge base
    pub knowledge_dir: PathBuf,
    /// One sub-directory per category of uploaded source files
    pub category_dir: PathBuf,
    /// Source files larger than this are skipped during ingestion
    pub max_file_size: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: PathBuf::from("~/.docent/knowledge/base"),
            category_dir: PathBuf::from("~/.docent/knowledge/category"),
            max_file_size: "10MB".to_string(),
        }
    }
}

/// Chunker size limits (bytes)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_bytes: usize,
    pub heading_headroom: usize,
    pub merge_ceiling: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 3000,
            heading_headroom: 2500,
            merge_ceiling: 8192,
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "http" (OpenAI-compatible endpoint) or "local" (fastembed)
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub dimension: usize,
    /// Provider-imposed ceiling on texts per request
    pub batch_size: usize,
    /// Embedding requests in flight at once while indexing
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            model: "text-embedding-v4".to_string(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            dimension: 1024,
            batch_size: 8,
            max_concurrent: 4,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Rerank service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub enabled: bool,
    /// "http" (text-rerank API) or "local" (fastembed cross-encoder)
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Provider ceiling on documents per rerank call
    pub max_candidates: usize,
    /// Results requested from the rerank model (and kept on fallback)
    pub top_n: usize,
    /// Maximum passages any single source file may contribute
    pub per_file_cap: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "http".to_string(),
            model: "gte-rerank-v2".to_string(),
            base_url:
                "https://dashscope.aliyuncs.com/api/v1/services/rerank/text-rerank/text-rerank"
                    .to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            timeout_secs: 15,
            max_candidates: 500,
            top_n: 50,
            per_file_cap: 5,
        }
    }
}

/// Vector retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k_per_kb: usize,
    pub max_concurrent_kbs: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_per_kb: 50,
            max_concurrent_kbs: 4,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    /// Endpoint used when the caller asks for a thinking model
    pub reasoning_base_url: String,
    pub reasoning_api_key_env: String,
    pub reasoning_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub system_prompt: String,
    /// Prior conversation messages carried into the prompt
    pub history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            api_key_env: "DASHSCOPE_API_KEY".to_string(),
            model: "qwen-max".to_string(),
            reasoning_base_url: "https://api.deepseek.com".to_string(),
            reasoning_api_key_env: "DEEPSEEK_API_KEY".to_string(),
            reasoning_model: "deepseek-reasoner".to_string(),
            temperature: 0.85,
            max_tokens: 4068,
            timeout_secs: 120,
            system_prompt:
                "You are a helpful assistant. Answer the question using the provided reference content."
                    .to_string(),
            history_turns: 5,
        }
    }
}

/// Chat defaults applied when a request does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub similarity_threshold: f32,
    pub final_n: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.2,
            final_n: 5,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8765".to_string(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocentError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| DocentError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| DocentError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| DocentError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.rerank_enabled {
            self.rerank.enabled = enabled;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: DOCENT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("DOCENT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__KNOWLEDGE_DIR" => {
                self.storage.knowledge_dir = PathBuf::from(value);
            }
            "STORAGE__CATEGORY_DIR" => {
                self.storage.category_dir = PathBuf::from(value);
            }
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__BASE_URL" => {
                self.embedding.base_url = value.to_string();
            }
            "EMBEDDING__MAX_CONCURRENT" => {
                self.embedding.max_concurrent = parse_env(path, value)?;
            }
            "RERANK__ENABLED" => {
                self.rerank.enabled = parse_env(path, value)?;
            }
            "RERANK__PER_FILE_CAP" => {
                self.rerank.per_file_cap = parse_env(path, value)?;
            }
            "LLM__MODEL" => {
                self.llm.model = value.to_string();
            }
            "LLM__BASE_URL" => {
                self.llm.base_url = value.to_string();
            }
            "CHAT__SIMILARITY_THRESHOLD" => {
                self.chat.similarity_threshold = parse_env(path, value)?;
            }
            "SERVER__BIND" => {
                self.server.bind = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DocentError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("docent").join("config.toml"))
    }

    /// Maximum source file size in bytes
    pub fn max_file_size_bytes(&self) -> Result<u64> {
        parse_size(&self.storage.max_file_size).ok_or_else(|| DocentError::InvalidConfigValue {
            path: "storage.max_file_size".to_string(),
            message: format!("Invalid size format: {}", self.storage.max_file_size),
        })
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| DocentError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Parse a size string such as `512KB`, `10MB` or `1024`
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| DocentError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| DocentError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
