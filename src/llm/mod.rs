//! Streaming chat-completion clients

mod openai;

pub use openai::{OpenAiCompatibleClient, SseParser};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("API key not set: {0}")]
    MissingApiKey(String),

    #[error("Client initialization failed: {0}")]
    Initialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Completion API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed stream event: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A streaming completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// Includes the system instruction as the first message
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    /// Omitted for reasoning models, which reject it
    pub temperature: Option<f32>,
}

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionDelta {
    pub reasoning: Option<String>,
    pub content: Option<String>,
}

impl CompletionDelta {
    pub fn is_empty(&self) -> bool {
        self.reasoning.as_deref().map_or(true, str::is_empty)
            && self.content.as_deref().map_or(true, str::is_empty)
    }
}

pub type DeltaStream = BoxStream<'static, Result<CompletionDelta, CompletionError>>;

/// A service that streams chat completions
///
/// Dropping the returned stream aborts the underlying request.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, CompletionError>;
}
