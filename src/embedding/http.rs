//! OpenAI-compatible remote embedding provider
//!
//! Calls `POST {base_url}/embeddings`. Transient failures (HTTP 429, 5xx,
//! network errors) are retried with exponential backoff; other client
//! errors fail immediately.

use super::provider::{check_dimensions, EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embedding provider backed by a remote `/embeddings` endpoint
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_retries: u32,
}

impl HttpEmbeddingProvider {
    /// Build a provider from configuration, reading the API key from the
    /// configured environment variable
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| EmbeddingError::MissingApiKey(config.api_key_env.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimension,
            "encoding_format": "float",
        });

        let mut last_err = String::from("no attempt made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                            EmbeddingError::GenerationError(format!(
                                "Invalid embedding response: {}",
                                e
                            ))
                        })?;
                        return order_embeddings(parsed, texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(
                            "Embedding attempt {} failed with {}: {}",
                            attempt + 1,
                            status,
                            body_text
                        );
                        last_err = format!("{}: {}", status, body_text);
                        continue;
                    }

                    return Err(EmbeddingError::GenerationError(format!(
                        "Embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    tracing::debug!("Embedding attempt {} failed: {}", attempt + 1, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(EmbeddingError::Unavailable {
            attempts: self.max_retries + 1,
            reason: last_err,
        })
    }
}

/// Put embeddings back in input order using the response indices
fn order_embeddings(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if response.data.len() != expected {
        return Err(EmbeddingError::GenerationError(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            response.data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        match slots.get_mut(index) {
            Some(slot @ None) => *slot = Some(datum.embedding),
            _ => {
                return Err(EmbeddingError::GenerationError(format!(
                    "Invalid or duplicate embedding index {}",
                    index
                )))
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| EmbeddingError::GenerationError("Missing embedding".to_string()))
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request(texts).await?;
        check_dimensions(&embeddings, self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
