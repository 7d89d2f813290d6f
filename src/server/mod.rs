//! Peer-facing HTTP API
//!
//! Every node serves this router to its peers: clipboard push/pull,
//! bounded history, file drops, and text messages. Clipboard content
//! accepted here is recorded in the sync engine's [`ContentStore`] so the
//! local broadcast loop does not echo it back to the network.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Path, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::clipboard::{Clipboard, ClipboardError};
use crate::files::{FileStore, StorageError};
use crate::history::{HistoryEntry, HistoryStore};
use crate::sync::{ContentStore, FROM_HOST_HEADER};

/// Maximum accepted request body (file uploads included)
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Shared state injected into every handler
pub struct AppState {
    pub clipboard: Arc<dyn Clipboard>,
    pub history: HistoryStore,
    pub files: FileStore,
    pub received: ContentStore,
}

/// Build the peer-facing router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/clipboard", get(get_clipboard).post(post_clipboard))
        .route("/clipboard/history", get(get_history))
        .route("/files", post(post_files))
        .route("/files/{id}", get(get_file))
        .route("/message", post(post_message))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Request handling errors, mapped onto HTTP statuses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("clipboard: {0}")]
    Clipboard(#[from] ClipboardError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Clipboard(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Storage(StorageError::NotFound(_) | StorageError::InvalidId(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// GET /clipboard — current local clipboard text
async fn get_clipboard(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let text = state.clipboard.get_text().await?;
    Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

/// POST /clipboard — accept clipboard content from a peer
///
/// Body is raw text, or multipart/form-data with a non-empty `text`
/// field. On success the content is written to the local clipboard,
/// appended to history, and recorded as network-received.
async fn post_clipboard(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<StatusCode, ApiError> {
    let from_host = from_host(&req);
    let content = extract_text(req).await?;
    accept_clipboard(&state, &content, &from_host).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /clipboard/history — received values, newest first
async fn get_history(State(state): State<Arc<AppState>>) -> Json<Vec<HistoryEntry>> {
    Json(state.history.snapshot())
}

#[derive(Serialize, Deserialize)]
struct FileResponse {
    file_id: String,
}

/// POST /files — store the first file part of a multipart upload
async fn post_files(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<FileResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let name = (!original_name.is_empty()).then_some(original_name.as_str());
        let file_id = state.files.store(name, data).await?;
        info!(file_id = %file_id, name = %original_name, "file received");
        return Ok(Json(FileResponse { file_id }));
    }
    Err(ApiError::BadRequest("no file in request".to_string()))
}

/// GET /files/{id} — serve a stored file back
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (bytes, name) = state.files.read(&id).await?;
    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
struct MessageRequest {
    #[serde(default)]
    text: String,
}

/// POST /message — deliver a text message by writing it to the clipboard
///
/// Shares the clipboard-accept path so messages get the same history and
/// feedback-loop bookkeeping as direct pushes. Empty text is a no-op that
/// still succeeds.
async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> Result<StatusCode, ApiError> {
    if !req.text.is_empty() {
        let from_host = host_from_headers(&headers).unwrap_or_else(|| "unknown".to_string());
        accept_clipboard(&state, &req.text, &from_host).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Clipboard write + history append + feedback-loop record
async fn accept_clipboard(
    state: &AppState,
    content: &str,
    from_host: &str,
) -> Result<(), ApiError> {
    state.clipboard.set_text(content).await?;
    state.history.push(HistoryEntry::new(content, from_host));
    state.received.record(content);
    debug!(from_host = %from_host, bytes = content.len(), "clipboard received");
    Ok(())
}

/// Pull the text content out of a clipboard-accept request
async fn extract_text(req: Request) -> Result<String, ApiError> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            if field.name() == Some("text") {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                if !text.is_empty() {
                    return Ok(text);
                }
            }
        }
        return Err(ApiError::BadRequest(
            "multipart body has no non-empty text field".to_string(),
        ));
    }

    let body = Bytes::from_request(req, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::BadRequest("clipboard body is not valid UTF-8".to_string()))
}

/// Origin host of a request: explicit header, else remote address
fn from_host(req: &Request) -> String {
    if let Some(host) = host_from_headers(req.headers()) {
        return host;
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn host_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FROM_HOST_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
