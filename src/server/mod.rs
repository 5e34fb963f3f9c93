//! HTTP surface for chat and retrieval clients
//!
//! | Method   | Path                            | Description                        |
//! |----------|---------------------------------|------------------------------------|
//! | `GET`    | `/health`                       | Health check (returns version)     |
//! | `GET`    | `/api/knowledge-bases`          | List knowledge base manifests      |
//! | `DELETE` | `/api/knowledge-bases/{id}`     | Delete a knowledge base            |
//! | `POST`   | `/api/chat`                     | Chat session as server-sent events |
//! | `POST`   | `/api/retrieve`                 | Ranked passages as JSON            |
//!
//! Errors use `{"error": {"code": ..., "message": ...}}` bodies. Each chat
//! event is one SSE `data:` record holding a `StreamEvent` as JSON.

use crate::chat::{ChatRequest, ChatService, SourceTree, StreamEvent};
use crate::chunker::DataType;
use crate::config::{expand_path, Config};
use crate::embedding::HnswParams;
use crate::retrieval::{RankedResult, SearchRequest, Searcher};
use crate::store::{KnowledgeBaseManifest, KnowledgeBaseStore, StoreError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

/// Events buffered between a session task and its HTTP response
const EVENT_BUFFER: usize = 64;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    store: Arc<KnowledgeBaseStore>,
    chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(store: Arc<KnowledgeBaseStore>, chat: Arc<ChatService>) -> Self {
        Self { store, chat }
    }

    fn searcher(&self) -> &Arc<Searcher> {
        self.chat.searcher()
    }
}

/// Build the router over `state`
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/knowledge-bases", get(handle_list_knowledge_bases))
        .route("/api/knowledge-bases/{id}", delete(handle_delete_knowledge_base))
        .route("/api/chat", post(handle_chat))
        .route("/api/retrieve", post(handle_retrieve))
        .layer(cors)
        .with_state(state)
}

/// Serve on `bind` until the process is terminated
pub async fn run_server(config: &Config, bind: &str) -> anyhow::Result<()> {
    let store = Arc::new(KnowledgeBaseStore::open(
        expand_path(&config.storage.knowledge_dir)?,
        HnswParams::from(&config.retrieval),
    )?);
    let searcher = Arc::new(Searcher::from_config(config, Arc::clone(&store))?);
    let chat = Arc::new(ChatService::from_config(config, searcher)?);

    let app = router(AppState::new(store, chat));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("docent listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let (status, code) = match e {
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: e.to_string(),
        }
    }
}

fn validate_query(query: &str, knowledge_base_ids: &[String]) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if knowledge_base_ids.is_empty() {
        return Err(bad_request("knowledge_base_ids must not be empty"));
    }
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_list_knowledge_bases(
    State(state): State<AppState>,
) -> Result<Json<Vec<KnowledgeBaseManifest>>, AppError> {
    Ok(Json(state.store.list()?))
}

async fn handle_delete_knowledge_base(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs the session on its own task; dropping the response stream drops
/// the receiver, which stops the session at its next send
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    validate_query(&request.query, &request.knowledge_base_ids)?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    let session = state.chat.session(request);
    tokio::spawn(async move {
        let outcome = session.run(tx).await;
        tracing::debug!("Chat session finished: {:?}", outcome);
    });

    let events = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    knowledge_base_ids: Vec<String>,
    #[serde(default)]
    final_n: Option<usize>,
    #[serde(default)]
    top_k_per_kb: Option<usize>,
    #[serde(default)]
    similarity_threshold: Option<f32>,
    #[serde(default)]
    data_type: Option<DataType>,
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
    results: Vec<RankedResult>,
    sources: SourceTree,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    validate_query(&request.query, &request.knowledge_base_ids)?;

    let defaults = state.chat.settings();
    let search = SearchRequest {
        query: request.query,
        knowledge_base_ids: request.knowledge_base_ids,
        top_k_per_kb: request.top_k_per_kb.unwrap_or(defaults.top_k_per_kb),
        final_n: request.final_n.unwrap_or(defaults.final_n),
        data_type: request.data_type,
    };

    let results = state.searcher().search(&search).await.map_err(|e| AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "retrieval_failed",
        message: e.to_string(),
    })?;

    let threshold = request
        .similarity_threshold
        .unwrap_or(defaults.similarity_threshold);
    let sources = SourceTree::from_results(&results, threshold);
    Ok(Json(RetrieveResponse { results, sources }))
}
