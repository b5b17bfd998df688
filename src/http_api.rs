//! HTTP surface for the router
//!
//! JSON over loopback HTTP, one endpoint per router operation.
//! Validation and protocol errors surface as 400 with the offending
//! detail; anything else collapses to an opaque 500 so internals never
//! leak to clients. Unknown paths are 404.

use axum::{
    Router,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::error;

use crate::error::RouterError;
use crate::protocol::types::Message;
use crate::router::Router as MessageRouter;

/// Error body shape for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Inbox pull body.
#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub agent: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    tasks: Option<String>,
    filter_task: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TraceQuery {
    task: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    agent: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresenceQuery {
    agent: Option<String>,
}

/// Builds the axum application over a shared router.
pub fn create_app(router: Arc<MessageRouter>) -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .route("/acks", post(post_ack))
        .route("/presence/register", post(post_presence_register))
        .route("/presence/heartbeat", post(post_presence_heartbeat))
        .route("/status", get(get_status))
        .route("/trace", get(get_trace))
        .route("/inbox", get(get_inbox))
        .route("/presence", get(get_presence))
        .route("/health", get(get_health))
        .fallback(not_found)
        .with_state(router)
}

async fn post_message(
    State(router): State<Arc<MessageRouter>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid json");
    };
    if is_empty_body(&payload) {
        return error_response(StatusCode::BAD_REQUEST, "message body required");
    }
    match router.receive_message(payload) {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(router_err) => router_error_response(&router_err),
    }
}

async fn post_ack(
    State(router): State<Arc<MessageRouter>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid json");
    };
    if is_empty_body(&payload) {
        return error_response(StatusCode::BAD_REQUEST, "ack body required");
    }
    match router.receive_ack(payload) {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(router_err) => router_error_response(&router_err),
    }
}

async fn post_presence_register(
    State(router): State<Arc<MessageRouter>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid json");
    };
    let agent = payload
        .get("agent")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let meta = payload.get("meta").cloned().filter(|meta| !meta.is_null());
    match router.register_presence(agent, meta) {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(router_err) => router_error_response(&router_err),
    }
}

async fn post_presence_heartbeat(
    State(router): State<Arc<MessageRouter>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return error_response(StatusCode::BAD_REQUEST, "invalid json");
    };
    let agent = payload
        .get("agent")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match router.heartbeat(agent) {
        Ok(entry) => (StatusCode::OK, Json(entry)).into_response(),
        Err(router_err) => router_error_response(&router_err),
    }
}

async fn get_status(
    State(router): State<Arc<MessageRouter>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let include_tasks = matches!(query.tasks.as_deref(), Some("1" | "true"));
    let report = router.status(include_tasks, query.filter_task.as_deref());
    (StatusCode::OK, Json(report)).into_response()
}

async fn get_trace(
    State(router): State<Arc<MessageRouter>>,
    Query(query): Query<TraceQuery>,
) -> Response {
    match router.trace(query.task.as_deref(), query.id.as_deref()) {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(router_err) => router_error_response(&router_err),
    }
}

async fn get_inbox(
    State(router): State<Arc<MessageRouter>>,
    Query(query): Query<InboxQuery>,
) -> Response {
    let Some(agent) = query.agent.filter(|agent| !agent.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "agent required");
    };
    let limit = match query.limit.as_deref() {
        None => 1,
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) => limit,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "limit must be int"),
        },
    };
    let messages = router.pop_inbox(&agent, limit);
    (StatusCode::OK, Json(InboxResponse { agent, messages })).into_response()
}

async fn get_presence(
    State(router): State<Arc<MessageRouter>>,
    Query(query): Query<PresenceQuery>,
) -> Response {
    let reply = router.presence_status(query.agent.as_deref());
    (StatusCode::OK, Json(reply)).into_response()
}

async fn get_health() -> Response {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
        .into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not found")
}

fn is_empty_body(payload: &Value) -> bool {
    payload.is_null() || payload.as_object().is_some_and(Map::is_empty)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn router_error_response(router_err: &RouterError) -> Response {
    if router_err.is_client_error() {
        return error_response(StatusCode::BAD_REQUEST, &router_err.to_string());
    }
    error!(error = %router_err, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}
