//! Streamable-HTTP MCP endpoint.
//!
//! `POST /mcp` dispatches JSON-RPC messages, `GET /mcp` streams
//! notifications over SSE and `DELETE /mcp` ends a session. The session id
//! travels in the `mcp-session-id` header.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
    },
    routing::{get, post},
};
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use toolbridge_core::BridgeGateway;
use toolbridge_session::{SessionError, SessionRegistry, SessionTransport};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    mcp::{INITIALIZE, McpHandler},
    protocol::{INVALID_REQUEST, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR, SERVER_ERROR},
    websocket,
};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared secrets. `None` disables the corresponding check.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Bearer token required on `/mcp`.
    pub token: Option<String>,
    /// Key the bridge agent must present.
    pub bridge_key: Option<String>,
}

impl AuthConfig {
    /// Build from raw values; empty strings count as unset.
    #[must_use]
    pub fn new(token: Option<String>, bridge_key: Option<String>) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Self {
            token: non_empty(token),
            bridge_key: non_empty(bridge_key),
        }
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub mcp: Arc<McpHandler>,
    pub gateway: Arc<BridgeGateway>,
    pub auth: Arc<AuthConfig>,
}

/// Request rejected before reaching the MCP dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Missing mcp-session-id header")]
    MissingSession,
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<SessionError> for HttpError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(id) => Self::SessionNotFound(id),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, SERVER_ERROR),
            Self::MissingSession => (StatusCode::BAD_REQUEST, SERVER_ERROR),
            Self::SessionNotFound(_) => (StatusCode::NOT_FOUND, SERVER_ERROR),
            Self::Parse(_) => (StatusCode::BAD_REQUEST, PARSE_ERROR),
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, INVALID_REQUEST),
        };
        let body = JsonRpcResponse::failure(Value::Null, code, self.to_string());
        (status, Json(body)).into_response()
    }
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub(crate) fn secret_matches(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn existing_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<SessionTransport>, HttpError> {
    let id = session_header(headers).ok_or(HttpError::MissingSession)?;
    Ok(state.sessions.get(id)?)
}

async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let Some(expected) = state.auth.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented.is_some_and(|token| secret_matches(token, expected)) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(
            method = %request.method(),
            uri = %request.uri(),
            "Rejected request with missing or invalid bearer token"
        );
        Err(HttpError::Unauthorized)
    }
}

async fn post_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let body: Value = serde_json::from_slice(&body).map_err(|e| HttpError::Parse(e.to_string()))?;
    let (messages, batch) = match body {
        Value::Array(items) if items.is_empty() => {
            return Err(HttpError::InvalidRequest("empty batch".to_string()));
        }
        Value::Array(items) => (items, true),
        single => (vec![single], false),
    };

    let initializing = messages
        .iter()
        .any(|m| m.get("method").and_then(Value::as_str) == Some(INITIALIZE));
    let session = if initializing {
        state.sessions.get_or_create(session_header(&headers)).0
    } else {
        existing_session(&state, &headers)?
    };
    if session.is_closed() {
        return Err(HttpError::SessionNotFound(session.id().to_string()));
    }

    let mut responses = Vec::new();
    let mut dispatched = false;
    for message in messages {
        let request = match serde_json::from_value::<JsonRpcRequest>(message.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = message.get("id").cloned().unwrap_or(Value::Null);
                responses.push(JsonRpcResponse::failure(id, INVALID_REQUEST, e.to_string()));
                continue;
            }
        };
        dispatched = true;
        if let Some(response) = state.mcp.handle(&session, request).await {
            responses.push(response);
        }
    }
    if dispatched {
        session.activate();
    }

    let header = [(SESSION_HEADER, session.id().to_string())];
    if responses.is_empty() {
        return Ok((StatusCode::ACCEPTED, header).into_response());
    }
    let body = if batch {
        json!(responses)
    } else {
        json!(responses.swap_remove(0))
    };
    Ok((StatusCode::OK, header, Json(body)).into_response())
}

async fn get_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>, HttpError> {
    let session = existing_session(&state, &headers)?;
    tracing::debug!(session_id = session.id(), "Notification stream opened");

    let stream = session
        .notification_stream()
        .map(|message| Ok(Event::default().event("message").data(message.to_string())))
        .boxed();
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn delete_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpError> {
    let id = session_header(&headers).ok_or(HttpError::MissingSession)?;
    state.sessions.remove(id)?;
    tracing::info!(session_id = id, "Session terminated by client");
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "bridge": state.gateway.status(),
        "sessions": state.sessions.len(),
    }))
}

/// Build the full application router.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    let mcp = Router::new()
        .route("/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .merge(mcp)
        .route("/bridge", get(websocket::bridge_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
