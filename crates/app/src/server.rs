use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use deck_search_core::{
    ChatAnswer, ChatError, ChatService, DeckRecord, DeckRepository, HybridSearch, SearchError,
    SearchResults, StoreError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

pub struct AppState {
    pub search: Arc<HybridSearch>,
    pub chat: Arc<ChatService>,
    pub decks: Arc<dyn DeckRepository>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadGateway(message) => (StatusCode::BAD_GATEWAY, message),
            ApiError::GatewayTimeout(message) => (StatusCode::GATEWAY_TIMEOUT, message),
            ApiError::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SearchError> for ApiError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::InvalidQuery(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(value: ChatError) -> Self {
        match value {
            ChatError::InvalidQuery(message) => ApiError::BadRequest(message),
            ChatError::Search(search) => search.into(),
            timeout @ ChatError::SearchTimeout(_) => ApiError::GatewayTimeout(timeout.to_string()),
            ChatError::Generation(generation) => ApiError::BadGateway(generation.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/chat", post(chat))
        .route("/decks/:id", get(deck))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<String>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, ApiError> {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("query parameter q is required".to_string()));
    }
    let limit = match params.limit.as_deref() {
        None | Some("") => DEFAULT_SEARCH_LIMIT,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest(format!("limit must be a positive integer, got {raw:?}")))?,
    };

    Ok(Json(state.search.search(&query, limit).await?))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    limit: Option<usize>,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }

    Ok(Json(state.chat.answer(&request.message, request.limit).await?))
}

async fn deck(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeckRecord>, ApiError> {
    state
        .decks
        .deck(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("deck {id} not found")))
}
