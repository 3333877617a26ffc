//! HTTP API for the chat front-end.
//!
//! Thin handlers that validate a few fields and forward to the message store
//! or the RAG backend. Identity comes from the auth proxy in front of this
//! server, which sets the `x-user-id` header for signed-in users.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/addMessage` | Persist `{chat_id, role, content}` |
//! | `GET`  | `/api/getMessages?chatId=` | Messages of a chat, oldest first |
//! | `GET`  | `/api/chat` | Chats of the signed-in user |
//! | `POST` | `/api/addChat` | Register `{id, user_id, title}` |
//! | `POST` | `/api/rag/add` | Forward `{text, chat_id, user_id}` to the backend |
//! | `POST` | `/api/rag/query?q=&user_id=&chat_id=` | Stream the backend's answer |
//! | `POST` | `/api/extract?name=` | Extract text from the raw request body |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Missing chatId parameter" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `too_large` (413),
//! `unreadable_document` (422), `backend_error` (backend status),
//! `backend_unavailable` (500), `internal` (500). An `/api/extract` body cut
//! off by the request size limit is reported as `too_large` as well.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::backend::{BackendError, RagClient};
use crate::config::Config;
use crate::extract::ExtractError;
use crate::extraction::ExtractionFacade;
use crate::models::{NewChat, Role, StoredMessage, UploadedFile};
use crate::store::{open_store, MessageStore, StoreError};

/// Header carrying the signed-in user's id.
pub const USER_HEADER: &str = "x-user-id";

/// Bound on JSON request bodies (extracted document text can be large).
const MAX_JSON_BODY: usize = 32 * 1024 * 1024;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub backend: RagClient,
    pub extraction: Arc<ExtractionFacade>,
}

impl AppState {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            store: open_store(config)?,
            backend: RagClient::from_config(config),
            extraction: Arc::new(ExtractionFacade::from_config(config)),
        })
    }
}

/// Builds the router; split out so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let extract_limit = usize::try_from(state.extraction.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(1);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/addMessage", post(handle_add_message))
        .route("/api/getMessages", get(handle_get_messages))
        .route("/api/chat", get(handle_list_chats))
        .route("/api/addChat", post(handle_add_chat))
        .route("/api/rag/add", post(handle_rag_add))
        .route("/api/rag/query", post(handle_rag_query))
        .route(
            "/api/extract",
            post(handle_extract).layer(DefaultBodyLimit::max(extract_limit)),
        )
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    if !state.backend.is_configured() {
        tracing::warn!("RAG_API_URL not configured; /api/rag/* will fail");
    }
    state.extraction.init().await;

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                detail: self.detail,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingFields => bad_request(err.to_string()),
            other => {
                error!(error = %other, "store error");
                internal(other.to_string())
            }
        }
    }
}

/// Maps backend failures, relaying the backend's own status when it has one.
fn backend_error(context: &str, err: BackendError) -> AppError {
    match err {
        BackendError::Unavailable => AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "backend_unavailable",
            err.to_string(),
        ),
        BackendError::Status { status, body } => AppError::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            "backend_error",
            format!("{}: backend returned {}", context, status),
        )
        .with_detail(body),
        BackendError::Transport(detail) => {
            internal(context.to_string()).with_detail(detail)
        }
    }
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        match &err {
            ExtractError::UnsupportedFormat { .. } => bad_request(err.to_string()),
            ExtractError::OversizeFile { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", err.to_string())
            }
            _ => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unreadable_document",
                err.to_string(),
            ),
        }
    }
}

/// Body limit hits become the same `too_large` error an oversize file gets.
fn body_rejection(state: &AppState, rejection: BytesRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "too_large",
            format!(
                "File size exceeds {}MB limit.",
                state.extraction.max_upload_bytes() / (1024 * 1024)
            ),
        )
    } else {
        bad_request(rejection.body_text())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/addMessage ============

#[derive(Deserialize)]
struct AddMessageRequest {
    chat_id: Option<String>,
    role: Option<String>,
    content: Option<String>,
}

async fn handle_add_message(
    State(state): State<AppState>,
    Json(req): Json<AddMessageRequest>,
) -> Result<Json<StoredMessage>, AppError> {
    let (Some(chat_id), Some(role), Some(content)) = (
        non_empty(req.chat_id),
        non_empty(req.role),
        req.content.filter(|c| !c.is_empty()),
    ) else {
        return Err(StoreError::MissingFields.into());
    };
    let role = Role::parse(&role)
        .ok_or_else(|| bad_request(format!("role must be user or assistant, got '{}'", role)))?;

    let row = state.store.insert_message(&chat_id, role, &content).await?;
    Ok(Json(row))
}

// ============ GET /api/getMessages ============

#[derive(Deserialize)]
struct GetMessagesParams {
    #[serde(rename = "chatId")]
    chat_id: Option<String>,
}

async fn handle_get_messages(
    State(state): State<AppState>,
    Query(params): Query<GetMessagesParams>,
) -> Result<Response, AppError> {
    let chat_id = non_empty(params.chat_id).ok_or_else(|| bad_request("Missing chatId parameter"))?;
    let messages = state.store.list_messages(&chat_id).await?;
    Ok(Json(messages).into_response())
}

// ============ GET /api/chat ============

fn signed_in_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized"))
}

async fn handle_list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user_id = signed_in_user(&headers)?;
    let chats = state.store.list_chat_titles(&user_id).await?;
    Ok(Json(chats).into_response())
}

// ============ POST /api/addChat ============

#[derive(Deserialize)]
struct AddChatRequest {
    id: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

async fn handle_add_chat(
    State(state): State<AppState>,
    Json(req): Json<AddChatRequest>,
) -> Result<(StatusCode, Json<NewChat>), AppError> {
    let (Some(id), Some(user_id)) = (non_empty(req.id), non_empty(req.user_id)) else {
        return Err(bad_request("Missing required fields: id, user_id"));
    };
    let chat = NewChat {
        id,
        user_id,
        title: req.title.unwrap_or_default(),
    };
    state.store.create_chat(&chat).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

// ============ POST /api/rag/add ============

#[derive(Deserialize)]
struct RagAddRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

async fn handle_rag_add(
    State(state): State<AppState>,
    Json(req): Json<RagAddRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ack = state
        .backend
        .add(
            req.text.as_deref().unwrap_or_default(),
            req.chat_id.as_deref().unwrap_or_default(),
            req.user_id.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(|e| backend_error("Failed to add document", e))?;
    Ok(Json(ack))
}

// ============ POST /api/rag/query ============

#[derive(Deserialize)]
struct RagQueryParams {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
}

async fn handle_rag_query(
    State(state): State<AppState>,
    Query(params): Query<RagQueryParams>,
) -> Result<Response, AppError> {
    let body = state
        .backend
        .query(
            params.q.as_deref().unwrap_or_default(),
            params.user_id.as_deref().unwrap_or_default(),
            params.chat_id.as_deref().filter(|c| !c.is_empty()),
        )
        .await
        .map_err(|e| backend_error("Failed to query RAG backend", e))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

// ============ POST /api/extract ============

#[derive(Deserialize)]
struct ExtractParams {
    name: Option<String>,
}

#[derive(Serialize)]
struct ExtractResponse {
    name: String,
    text: String,
}

async fn handle_extract(
    State(state): State<AppState>,
    Query(params): Query<ExtractParams>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ExtractResponse>, AppError> {
    let body = body.map_err(|rejection| body_rejection(&state, rejection))?;
    let name = non_empty(params.name).ok_or_else(|| bad_request("Missing name parameter"))?;
    let text = state
        .extraction
        .extract_text(UploadedFile::from_bytes(name.clone(), body))
        .await?;
    Ok(Json(ExtractResponse { name, text }))
}
