use super::prompt::{build_messages, render_results};
use super::{ChatRequest, ModelProfile, SessionState, SourceTree, StreamEvent};
use crate::config::Config;
use crate::llm::{CompletionProvider, CompletionRequest, OpenAiCompatibleClient};
use crate::retrieval::{RankedResult, SearchRequest, Searcher};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Defaults applied to every session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub standard_model: String,
    pub reasoning_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub history_turns: usize,
    pub similarity_threshold: f32,
    pub final_n: usize,
    pub top_k_per_kb: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            standard_model: config.llm.model.clone(),
            reasoning_model: config.llm.reasoning_model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            system_prompt: config.llm.system_prompt.clone(),
            history_turns: config.llm.history_turns,
            similarity_threshold: config.chat.similarity_threshold,
            final_n: config.chat.final_n,
            top_k_per_kb: config.retrieval.top_k_per_kb,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The `end` event was delivered
    Ended,
    /// The `error` event was delivered
    Errored,
    /// The receiver went away before a terminal event could be delivered
    Cancelled,
}

/// Shared collaborators for chat sessions
pub struct ChatService {
    searcher: Arc<Searcher>,
    standard: Arc<dyn CompletionProvider>,
    reasoning: Option<Arc<dyn CompletionProvider>>,
    settings: SessionSettings,
}

impl ChatService {
    pub fn new(
        searcher: Arc<Searcher>,
        standard: Arc<dyn CompletionProvider>,
        reasoning: Option<Arc<dyn CompletionProvider>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            searcher,
            standard,
            reasoning,
            settings,
        }
    }

    /// Build completion clients from configuration
    ///
    /// The standard endpoint is required; the reasoning endpoint is optional
    /// and sessions asking for it fall back to the standard one when its
    /// key is missing.
    pub fn from_config(config: &Config, searcher: Arc<Searcher>) -> crate::Result<Self> {
        let llm = &config.llm;
        let standard: Arc<dyn CompletionProvider> = Arc::new(OpenAiCompatibleClient::new(
            &llm.base_url,
            &llm.api_key_env,
            llm.timeout_secs,
        )?);

        let reasoning = match OpenAiCompatibleClient::new(
            &llm.reasoning_base_url,
            &llm.reasoning_api_key_env,
            llm.timeout_secs,
        ) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn CompletionProvider>),
            Err(e) => {
                tracing::warn!("Reasoning model unavailable: {}", e);
                None
            }
        };

        Ok(Self::new(
            searcher,
            standard,
            reasoning,
            SessionSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn searcher(&self) -> &Arc<Searcher> {
        &self.searcher
    }

    /// Start a session for `request`; the model profile is fixed here
    pub fn session(self: &Arc<Self>, request: ChatRequest) -> ChatSession {
        let mut profile = ModelProfile::from_flags(request.thinking);
        if profile == ModelProfile::Reasoning && self.reasoning.is_none() {
            tracing::warn!("No reasoning model configured, answering with the standard model");
            profile = ModelProfile::Standard;
        }

        ChatSession {
            service: Arc::clone(self),
            request,
            profile,
            state: SessionState::Retrieving,
        }
    }
}

enum Halt {
    Failed(String),
    Disconnected,
}

/// One chat turn, driven to a single terminal event
pub struct ChatSession {
    service: Arc<ChatService>,
    request: ChatRequest,
    profile: ModelProfile,
    state: SessionState,
}

impl ChatSession {
    pub fn profile(&self) -> ModelProfile {
        self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session, sending events to `tx`
    ///
    /// Stops early, dropping the completion stream, as soon as the receiver
    /// is dropped, whether the session is sending or waiting.
    pub async fn run(mut self, tx: mpsc::Sender<StreamEvent>) -> SessionOutcome {
        match self.drive(&tx).await {
            Ok(()) => SessionOutcome::Ended,
            Err(Halt::Disconnected) => {
                tracing::info!("Chat receiver dropped in state {:?}, stopping", self.state);
                SessionOutcome::Cancelled
            }
            Err(Halt::Failed(message)) => {
                tracing::warn!("Chat session failed in state {:?}: {}", self.state, message);
                self.transition(SessionState::Errored);
                if tx.send(StreamEvent::error(message)).await.is_err() {
                    return SessionOutcome::Cancelled;
                }
                SessionOutcome::Errored
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!("Chat session {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn drive(&mut self, tx: &mpsc::Sender<StreamEvent>) -> Result<(), Halt> {
        let service = Arc::clone(&self.service);
        let settings = &service.settings;
        let threshold = self
            .request
            .similarity_threshold
            .unwrap_or(settings.similarity_threshold);

        self.transition(SessionState::Retrieving);
        let search = SearchRequest {
            query: self.request.query.clone(),
            knowledge_base_ids: self.request.knowledge_base_ids.clone(),
            top_k_per_kb: self.request.top_k_per_kb.unwrap_or(settings.top_k_per_kb),
            final_n: self.request.final_n.unwrap_or(settings.final_n),
            data_type: self.request.data_type,
        };

        let searched = tokio::select! {
            _ = tx.closed() => return Err(Halt::Disconnected),
            searched = service.searcher.search(&search) => searched,
        };
        let results = match searched {
            Ok(results) => results,
            Err(e) => {
                send(tx, StreamEvent::chunks(String::new(), SourceTree::new())).await?;
                return Err(Halt::Failed(format!("Retrieval failed: {}", e)));
            }
        };

        let sources = SourceTree::from_results(&results, threshold);
        send(tx, StreamEvent::chunks(render_results(&results), sources.clone())).await?;

        self.transition(SessionState::Prompting);
        let passages: Vec<&RankedResult> = results
            .iter()
            .filter(|r| r.relevance_score >= threshold)
            .collect();
        let completion = self.completion_request(&passages);
        tracing::info!(
            "Prompting {} with {} of {} passages",
            completion.model,
            passages.len(),
            results.len()
        );

        let provider = match self.profile {
            ModelProfile::Reasoning => service.reasoning.as_ref(),
            ModelProfile::Standard => None,
        }
        .unwrap_or(&service.standard);

        let opened = tokio::select! {
            _ = tx.closed() => return Err(Halt::Disconnected),
            opened = provider.stream(completion) => opened,
        };
        let mut stream = opened.map_err(|e| Halt::Failed(format!("Completion failed: {}", e)))?;

        // A dropped receiver ends the session even between sends
        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Err(Halt::Disconnected),
                next = stream.next() => next,
            };
            let Some(delta) = next else { break };
            let delta = delta.map_err(|e| Halt::Failed(format!("Completion failed: {}", e)))?;

            if let Some(reasoning) = delta.reasoning {
                if self.profile == ModelProfile::Reasoning && !reasoning.is_empty() {
                    self.transition(SessionState::Reasoning);
                    send(tx, StreamEvent::reasoning(reasoning)).await?;
                }
            }

            if let Some(content) = delta.content {
                if content.is_empty() {
                    continue;
                }
                self.transition(SessionState::Answering);
                answer.push_str(&content);
                let event = match self.profile {
                    ModelProfile::Reasoning => StreamEvent::content(content),
                    ModelProfile::Standard => StreamEvent::tokens(content),
                };
                send(tx, event).await?;
            }
        }
        drop(stream);

        self.transition(SessionState::Ended);
        tracing::info!("Chat session answered with {} bytes", answer.len());
        send(tx, StreamEvent::end(answer, sources)).await
    }

    fn completion_request(&self, passages: &[&RankedResult]) -> CompletionRequest {
        let settings = &self.service.settings;
        let messages = build_messages(
            &settings.system_prompt,
            &self.request.history,
            settings.history_turns,
            passages,
            &self.request.query,
        );

        let (default_model, temperature) = match self.profile {
            ModelProfile::Reasoning => (&settings.reasoning_model, None),
            ModelProfile::Standard => (
                &settings.standard_model,
                Some(self.request.temperature.unwrap_or(settings.temperature)),
            ),
        };

        CompletionRequest {
            model: self
                .request
                .model
                .clone()
                .unwrap_or_else(|| default_model.clone()),
            messages,
            max_tokens: self.request.max_tokens.unwrap_or(settings.max_tokens),
            temperature,
        }
    }
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Disconnected)
}
