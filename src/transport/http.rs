//! The HTTP transport: session-per-header instead of session-per-connection.
//!
//! A session is created by POSTing `initialize` to `/mcp` without a session
//! header; the response carries the assigned id in `Mcp-Session-Id`, and
//! every later request quotes it back. Each session is owned by one actor
//! task consuming a command channel, so dispatch stays serialized exactly as
//! it is on stream transports. Notifications buffer in the session's sink
//! channel until a client opens the SSE stream with GET `/mcp`.

use crate::auth::{resolve_credential, TOKEN_HEADER, TOKEN_QUERY_PARAM};
use crate::error::{Error, Result};
use crate::server::{Server, SessionCore};
use crate::types::{ErrorResponse, RequestId};
use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

/// Response and request header carrying the session id.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

enum SessionCommand {
    Message {
        raw: Value,
        reply: oneshot::Sender<Option<String>>,
    },
    Close,
}

/// One live session's handles: the command channel feeding its actor and
/// the notification receiver an SSE stream may claim (at most once).
struct SessionEntry {
    commands: mpsc::Sender<SessionCommand>,
    notifications: Mutex<Option<mpsc::Receiver<String>>>,
}

#[derive(Clone)]
struct HttpState {
    server: Arc<Server>,
    sessions: Arc<DashMap<String, SessionEntry>>,
}

/// Builds the gateway's HTTP router.
pub fn router(server: Arc<Server>) -> Router {
    let state = HttpState {
        server,
        sessions: Arc::new(DashMap::new()),
    };
    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            get(open_notification_stream)
                .post(post_message)
                .delete(close_session),
        )
        .with_state(state)
}

/// Serves the router until the process is stopped.
pub async fn serve(server: Arc<Server>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening for http sessions");
    axum::serve(listener, router(server))
        .await
        .map_err(|e| Error::Internal(format!("http server failed: {e}")))
}

async fn health() -> &'static str {
    "ok"
}

async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(raw): Json<Value>,
) -> Response {
    match session_id_from(&headers) {
        Some(session_id) => forward_to_session(&state, &session_id, raw).await,
        None => create_session(&state, &query, &headers, raw).await,
    }
}

/// Creates a session and dispatches its first message. The first message
/// must be `initialize`; anything else is rejected before a session exists.
async fn create_session(
    state: &HttpState,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    raw: Value,
) -> Response {
    if raw.get("method").and_then(Value::as_str) != Some("initialize") {
        let error = Error::InvalidRequest(
            "a request without a session header must be 'initialize'".to_string(),
        );
        return error_response(StatusCode::BAD_REQUEST, &raw, &error);
    }

    let session_id = Uuid::new_v4().to_string();
    let query_token = query.get(TOKEN_QUERY_PARAM).map(String::as_str);
    let header_token = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    if let Some(token) = resolve_credential(query_token, header_token) {
        state.server.credentials().bind(&session_id, token);
    }

    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(16);
    let (notification_tx, notification_rx) = mpsc::channel::<String>(32);
    let core = SessionCore::new(session_id.clone(), state.server.clone(), notification_tx);
    state.sessions.insert(
        session_id.clone(),
        SessionEntry {
            commands: command_tx.clone(),
            notifications: Mutex::new(Some(notification_rx)),
        },
    );
    tokio::spawn(session_actor(core, command_rx, state.sessions.clone()));
    info!(session = %session_id, "http session created");

    let mut response = dispatch(&command_tx, raw).await;
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_ID_HEADER, value);
    }
    response
}

async fn forward_to_session(state: &HttpState, session_id: &str, raw: Value) -> Response {
    let Some(commands) = state
        .sessions
        .get(session_id)
        .map(|entry| entry.commands.clone())
    else {
        return unknown_session(&raw, session_id);
    };
    dispatch(&commands, raw).await
}

/// Hands one message to the session's actor and waits for its reply.
async fn dispatch(commands: &mpsc::Sender<SessionCommand>, raw: Value) -> Response {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = SessionCommand::Message {
        raw,
        reply: reply_tx,
    };
    if commands.send(command).await.is_err() {
        return StatusCode::GONE.into_response();
    }
    match reply_rx.await {
        // Notifications produce no response body.
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Ok(Some(body)) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(_) => StatusCode::GONE.into_response(),
    }
}

async fn close_session(State(state): State<HttpState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some((_, entry)) = state.sessions.remove(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // The actor tears the core down when it sees Close (or when the channel
    // drops, whichever comes first).
    let _ = entry.commands.send(SessionCommand::Close).await;
    info!(session = %session_id, "http session deleted");
    StatusCode::NO_CONTENT.into_response()
}

/// Attaches the SSE notification stream. Each session has exactly one
/// receiver; a second GET conflicts rather than silently splitting it.
async fn open_notification_stream(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_id_from(&headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(entry) = state.sessions.get(&session_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(receiver) = entry.notifications.lock().unwrap().take() else {
        return StatusCode::CONFLICT.into_response();
    };
    drop(entry);

    let stream = futures_util::stream::unfold(receiver, |mut rx| async move {
        let payload = rx.recv().await?;
        let event = Event::default().event("message").data(payload);
        Some((Ok::<Event, Infallible>(event), rx))
    });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Owns one session core for its whole life. Commands arrive strictly in
/// order; teardown runs exactly once, on Close or channel drop.
async fn session_actor(
    mut core: SessionCore,
    mut commands: mpsc::Receiver<SessionCommand>,
    sessions: Arc<DashMap<String, SessionEntry>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Message { raw, reply } => {
                let response = match core.handle_message(raw).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(session = %core.id(), error = %e, "failed to handle message");
                        Some(internal_error_body())
                    }
                };
                // A dropped reply means the HTTP request was abandoned.
                let _ = reply.send(response);
            }
            SessionCommand::Close => break,
        }
    }
    core.close();
    sessions.remove(core.id());
}

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn request_id_from(raw: &Value) -> RequestId {
    raw.get("id")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(RequestId::Num(0))
}

fn unknown_session(raw: &Value, session_id: &str) -> Response {
    let error = Error::SessionNotFound(session_id.to_string());
    error_response(StatusCode::NOT_FOUND, raw, &error)
}

fn error_response(status: StatusCode, raw: &Value, error: &Error) -> Response {
    let body = ErrorResponse::new(request_id_from(raw), error.to_error_data());
    (status, Json(body)).into_response()
}

fn internal_error_body() -> String {
    r#"{"jsonrpc":"2.0","id":0,"error":{"code":-32603,"message":"internal error"}}"#.to_string()
}
