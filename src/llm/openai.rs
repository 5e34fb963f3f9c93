//! OpenAI-compatible streaming chat completions
//!
//! Works with any endpoint that streams `chat.completion.chunk` objects as
//! server-sent events (`data: {...}` lines terminated by `data: [DONE]`),
//! including providers that put chain-of-thought in `reasoning_content`.

use super::{CompletionDelta, CompletionError, CompletionProvider, CompletionRequest, DeltaStream};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Incremental parser for an SSE byte stream
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning every delta completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<CompletionDelta, CompletionError>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if self.done {
                continue;
            }
            if let Some(item) = self.parse_line(&String::from_utf8_lossy(&line)) {
                out.push(item);
            }
        }
        out
    }

    /// Flush a final unterminated line at end of stream
    pub fn finish(&mut self) -> Vec<Result<CompletionDelta, CompletionError>> {
        if self.buffer.is_empty() || self.done {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.parse_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<Result<CompletionDelta, CompletionError>> {
        let line = line.trim();
        let payload = line.strip_prefix("data:")?.trim_start();

        if payload == "[DONE]" {
            self.done = true;
            return None;
        }

        let chunk: ChunkPayload = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(CompletionError::Malformed(e.to_string()))),
        };

        if let Some(error) = chunk.error {
            return Some(Err(CompletionError::Malformed(format!(
                "provider error: {}",
                error
            ))));
        }

        let delta = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .map(|d| CompletionDelta {
                reasoning: d.reasoning_content.filter(|s| !s.is_empty()),
                content: d.content.filter(|s| !s.is_empty()),
            })
            .unwrap_or_default();

        if delta.is_empty() {
            None
        } else {
            Some(Ok(delta))
        }
    }
}

struct StreamState<S> {
    bytes: S,
    parser: SseParser,
    pending: VecDeque<Result<CompletionDelta, CompletionError>>,
    finished: bool,
}

/// Turn a response byte stream into completion deltas
pub(crate) fn delta_stream<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = StreamState {
        bytes,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished || state.parser.is_done() {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let parsed = state.parser.feed(bytes.as_ref());
                    state.pending.extend(parsed);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(CompletionError::Network(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    let parsed = state.parser.finish();
                    state.pending.extend(parsed);
                }
            }
        }
    })
    .boxed()
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiCompatibleClient {
    /// Build a client, reading the API key from `api_key_env`
    pub fn new(
        base_url: &str,
        api_key_env: &str,
        timeout_secs: u64,
    ) -> Result<Self, CompletionError> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| CompletionError::MissingApiKey(api_key_env.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CompletionError::Initialization(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, CompletionError> {
        tracing::debug!(
            "Streaming completion from {} ({} messages)",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(delta_stream(response.bytes_stream().boxed()))
    }
}
