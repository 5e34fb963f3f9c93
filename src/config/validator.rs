use crate::chunker::MAX_CHUNK_BYTES;
use crate::config::{parse_size, Config, SCHEMA_VERSION};
use crate::error::{DocentError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem before failing
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_chat(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocentError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.knowledge_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.knowledge_dir",
                "Knowledge directory cannot be empty",
            ));
        }

        if parse_size(&config.storage.max_file_size).is_none() {
            errors.push(ValidationError::new(
                "storage.max_file_size",
                format!("Invalid size format: {}", config.storage.max_file_size),
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.max_chunk_bytes == 0 {
            errors.push(ValidationError::new(
                "chunking.max_chunk_bytes",
                "Chunk size must be greater than 0",
            ));
        }
        if chunking.heading_headroom > chunking.max_chunk_bytes {
            errors.push(ValidationError::new(
                "chunking.heading_headroom",
                "Heading headroom cannot exceed max_chunk_bytes",
            ));
        }
        if chunking.merge_ceiling < chunking.max_chunk_bytes {
            errors.push(ValidationError::new(
                "chunking.merge_ceiling",
                "Merge ceiling must be at least max_chunk_bytes",
            ));
        }
        if chunking.max_chunk_bytes > MAX_CHUNK_BYTES {
            errors.push(ValidationError::new(
                "chunking.max_chunk_bytes",
                format!("Chunk size cannot exceed {} bytes", MAX_CHUNK_BYTES),
            ));
        }
        if chunking.merge_ceiling > MAX_CHUNK_BYTES {
            errors.push(ValidationError::new(
                "chunking.merge_ceiling",
                format!("Merge ceiling cannot exceed {} bytes", MAX_CHUNK_BYTES),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if provider != "http" && provider != "local" {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Invalid provider '{}': must be 'http' or 'local'", provider),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "max_concurrent must be greater than 0",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.rerank.provider;
        if provider != "http" && provider != "local" {
            errors.push(ValidationError::new(
                "rerank.provider",
                format!("Invalid provider '{}': must be 'http' or 'local'", provider),
            ));
        }

        if config.rerank.max_candidates == 0 {
            errors.push(ValidationError::new(
                "rerank.max_candidates",
                "Candidate ceiling must be greater than 0",
            ));
        }

        if config.rerank.per_file_cap == 0 {
            errors.push(ValidationError::new(
                "rerank.per_file_cap",
                "Per-file cap must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        if retrieval.top_k_per_kb == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k_per_kb",
                "top_k_per_kb must be greater than 0",
            ));
        }
        if retrieval.max_concurrent_kbs == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_concurrent_kbs",
                "max_concurrent_kbs must be greater than 0",
            ));
        }
        if !(4..=64).contains(&retrieval.hnsw_m) {
            errors.push(ValidationError::new(
                "retrieval.hnsw_m",
                format!("hnsw_m should be between 4 and 64, got {}", retrieval.hnsw_m),
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new(
                "llm.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }
    }

    fn validate_chat(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chat.final_n == 0 {
            errors.push(ValidationError::new(
                "chat.final_n",
                "final_n must be greater than 0",
            ));
        }
        if !config.chat.similarity_threshold.is_finite() {
            errors.push(ValidationError::new(
                "chat.similarity_threshold",
                "Similarity threshold must be a finite number",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.embedding.batch_size = 0;
        config.embedding.max_concurrent = 0;
        config.rerank.provider = "cohere".to_string();
        config.llm.temperature = 3.5;

        match ConfigValidator::validate(&config) {
            Err(DocentError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"embedding.batch_size"));
                assert!(paths.contains(&"embedding.max_concurrent"));
                assert!(paths.contains(&"rerank.provider"));
                assert!(paths.contains(&"llm.temperature"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_chunking_limits() {
        let mut config = Config::default();
        config.chunking.heading_headroom = 4000;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_chunk_sizes_above_hard_ceiling_rejected() {
        let mut config = Config::default();
        config.chunking.max_chunk_bytes = 10_000;
        config.chunking.heading_headroom = 9_000;
        config.chunking.merge_ceiling = 12_000;

        match ConfigValidator::validate(&config) {
            Err(DocentError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"chunking.max_chunk_bytes"));
                assert!(paths.contains(&"chunking.merge_ceiling"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
