//! Remote text-rerank service
//!
//! Speaks the DashScope text-rerank protocol:
//! `{"model", "input": {"query", "documents"}, "parameters": {"top_n", ...}}`
//! answered by `{"output": {"results": [{"index", "relevance_score"}]}}`.
//! A top-level `results` array (Cohere/Jina style) is accepted as well.

use crate::config::RerankConfig;
use crate::retrieval::{RerankError, RerankHit, RerankProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    output: Option<RerankOutput>,
    #[serde(default)]
    results: Option<Vec<RerankResultItem>>,
}

#[derive(Debug, Deserialize)]
struct RerankOutput {
    results: Vec<RerankResultItem>,
}

#[derive(Debug, Deserialize)]
struct RerankResultItem {
    index: usize,
    relevance_score: f32,
}

/// Rerank provider backed by an HTTP text-rerank endpoint
pub struct HttpRerankProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpRerankProvider {
    pub fn new(config: &RerankConfig) -> Result<Self, RerankError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RerankError::InitializationError(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }
}

fn parse_response(body: &str) -> Result<Vec<RerankHit>, RerankError> {
    let response: RerankResponse =
        serde_json::from_str(body).map_err(|e| RerankError::MalformedResponse(e.to_string()))?;

    let results = response
        .output
        .map(|o| o.results)
        .or(response.results)
        .ok_or_else(|| RerankError::MalformedResponse("missing results".to_string()))?;

    Ok(results
        .into_iter()
        .map(|r| RerankHit {
            index: r.index,
            relevance_score: r.relevance_score,
        })
        .collect())
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": {
                "query": query,
                "documents": documents,
            },
            "parameters": {
                "return_documents": false,
                "top_n": top_n,
            },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        if !status.is_success() {
            return Err(RerankError::RerankingError(format!(
                "Rerank API error {}: {}",
                status, text
            )));
        }

        parse_response(&text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
