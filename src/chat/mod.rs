//! Streaming chat sessions over retrieved passages
//!
//! A session retrieves and reranks passages, emits them as a `chunks` event,
//! grounds the completion prompt in the passages that clear the similarity
//! threshold, then relays the completion stream as `reasoning`, `content` or
//! `tokens` events until exactly one terminal `end` or `error` event.

mod prompt;
mod session;

pub use crate::retrieval::{SourceEntry, SourceTree};
pub use prompt::{build_messages, render_context, render_results};
pub use session::{ChatService, ChatSession, SessionOutcome, SessionSettings};

use crate::chunker::DataType;
use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};

/// Which completion endpoint a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    /// Answer deltas only, relayed as `tokens` events
    Standard,
    /// Reasoning deltas followed by answer deltas, relayed as `reasoning`
    /// and `content` events
    Reasoning,
}

impl ModelProfile {
    pub fn from_flags(thinking: bool) -> Self {
        if thinking {
            ModelProfile::Reasoning
        } else {
            ModelProfile::Standard
        }
    }
}

/// Kind of a streamed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Chunks,
    Reasoning,
    Content,
    Tokens,
    End,
    Error,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::End | EventStatus::Error)
    }
}

/// One record of the caller-facing event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub status: EventStatus,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<SourceTree>,
}

impl StreamEvent {
    pub fn chunks(content: impl Into<String>, sources: SourceTree) -> Self {
        Self {
            status: EventStatus::Chunks,
            content: content.into(),
            sources: Some(sources),
        }
    }

    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::text(EventStatus::Reasoning, content)
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::text(EventStatus::Content, content)
    }

    pub fn tokens(content: impl Into<String>) -> Self {
        Self::text(EventStatus::Tokens, content)
    }

    pub fn end(answer: impl Into<String>, sources: SourceTree) -> Self {
        Self {
            status: EventStatus::End,
            content: answer.into(),
            sources: Some(sources),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::text(EventStatus::Error, message)
    }

    fn text(status: EventStatus, content: impl Into<String>) -> Self {
        Self {
            status,
            content: content.into(),
            sources: None,
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Retrieving,
    Prompting,
    Reasoning,
    Answering,
    Ended,
    Errored,
}

/// A chat turn as submitted by a caller
///
/// Unset optional fields fall back to the service's configured defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,

    pub knowledge_base_ids: Vec<String>,

    /// Earlier messages of the conversation, oldest first
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    #[serde(default)]
    pub similarity_threshold: Option<f32>,

    #[serde(default)]
    pub final_n: Option<usize>,

    #[serde(default)]
    pub top_k_per_kb: Option<usize>,

    /// Model name override for the selected profile
    #[serde(default)]
    pub model: Option<String>,

    /// Use the reasoning profile
    #[serde(default)]
    pub thinking: bool,

    #[serde(default)]
    pub data_type: Option<DataType>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>, knowledge_base_ids: Vec<String>) -> Self {
        Self {
            query: query.into(),
            knowledge_base_ids,
            history: Vec::new(),
            similarity_threshold: None,
            final_n: None,
            top_k_per_kb: None,
            model: None,
            thinking: false,
            data_type: None,
            max_tokens: None,
            temperature: None,
        }
    }
}
