//! HTTP gateway.
//!
//! Serves:
//! - `POST /api/chat`               — one conversational turn
//! - `GET  /api/status`             — liveness probe
//! - `GET  /api/conversations/:id`  — transcript readback
//! - `GET  /confirm/:booking_id`    — confirmation link (public: the
//!   booking id is an unguessable UUID the customer received by email)
//!
//! `/api` routes are guarded by bearer-token auth when
//! `FRONTDESK_API_TOKEN` is set.  Internal failures never leak detail
//! to the caller: the chat handler logs them and returns a generic 500.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Request, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::AgentRuntime;
use crate::booking::{BookingError, Bookings};
use crate::convo::gate::{ConversationGate, GateError};
use crate::convo::{ConversationStore, ConvoStatus, Exchange, HANDOVER_MESSAGE};
use crate::tools::ToolContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) runtime: Arc<AgentRuntime>,
    pub(crate) bookings: Arc<Bookings>,
    pub(crate) conversations: Arc<ConversationStore>,
    pub(crate) gate: Arc<ConversationGate>,
    pub(crate) history_limit: usize,
    pub(crate) min_monthly_budget: Option<i64>,
    pub(crate) api_token: Option<String>,
}

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    pub handle: JoinHandle<()>,
    pub addr: SocketAddr,
}

/// Everything the gateway needs, built in `main` from the config.
pub struct GatewayDeps {
    pub runtime: Arc<AgentRuntime>,
    pub bookings: Arc<Bookings>,
    pub conversations: Arc<ConversationStore>,
    pub gate: Arc<ConversationGate>,
    pub history_limit: usize,
    pub min_monthly_budget: Option<i64>,
}

/// Start the HTTP server on `addr`.
pub async fn start_gateway(addr: SocketAddr, deps: GatewayDeps) -> std::io::Result<Gateway> {
    let api_token = std::env::var("FRONTDESK_API_TOKEN")
        .ok()
        .filter(|s| !s.is_empty());
    if api_token.is_some() {
        info!("API authentication enabled (FRONTDESK_API_TOKEN set)");
    } else {
        warn!("API authentication disabled (FRONTDESK_API_TOKEN not set)");
    }

    let state = AppState {
        runtime: deps.runtime,
        bookings: deps.bookings,
        conversations: deps.conversations,
        gate: deps.gate,
        history_limit: deps.history_limit,
        min_monthly_budget: deps.min_monthly_budget,
        api_token,
    };

    let api_router = Router::new()
        .route("/chat", post(chat_handler))
        .route("/status", get(status_handler))
        .route("/conversations/:id", get(conversation_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    let app = Router::new()
        .nest("/api", api_router)
        // Outside auth — reached from the confirmation email.
        .route("/confirm/:booking_id", get(confirm_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, "gateway started");
    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}

// ── Auth ─────────────────────────────────────────────────────

/// Token the caller presented: `Authorization: Bearer <token>`, or a
/// `token` query parameter for callers that cannot set headers.
fn presented_token(req: &Request<Body>) -> Option<&str> {
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer.or_else(|| {
        req.uri()
            .query()
            .and_then(|q| q.split('&').find_map(|pair| pair.strip_prefix("token=")))
    })
}

async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: middleware::Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };
    match presented_token(&req) {
        Some(token) if token == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response(),
    }
}

// ── Handlers ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    conversation_id: String,
    query: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatResponse {
    response: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "query must not be empty"})),
        )
            .into_response();
    }

    let conversation_id = req.conversation_id.clone();
    let result = state
        .gate
        .run(&conversation_id, || run_turn(&state, &req))
        .await;

    match result {
        Ok(response) => (StatusCode::OK, Json(ChatResponse { response })).into_response(),
        Err(GateError::Timeout(limit)) => {
            error!(conversation = %conversation_id, ?limit, "turn timed out");
            internal_error()
        }
        Err(GateError::Inner(e)) => {
            error!(conversation = %conversation_id, error = %e, "turn failed");
            internal_error()
        }
    }
}

/// One serialized turn: handover short-circuit, history replay, the
/// agent loop, then transcript persistence.
async fn run_turn(state: &AppState, req: &ChatRequest) -> anyhow::Result<String> {
    let id = &req.conversation_id;

    // Handed-over conversations never reach the model.
    if state.conversations.status(id) == ConvoStatus::Handover {
        state.conversations.append(id, &Exchange::now("user", &req.query)).await?;
        state
            .conversations
            .append(id, &Exchange::now("assistant", HANDOVER_MESSAGE))
            .await?;
        return Ok(HANDOVER_MESSAGE.to_string());
    }

    let history = state.conversations.load_history(id, state.history_limit).await?;
    let ctx = ToolContext {
        bookings: state.bookings.clone(),
        conversations: state.conversations.clone(),
        conversation_id: id.clone(),
        min_monthly_budget: state.min_monthly_budget,
    };

    let outcome = state.runtime.run_turn(&req.query, &history, &ctx).await?;

    state.conversations.append(id, &Exchange::now("user", &req.query)).await?;
    let mut reply = Exchange::now("assistant", &outcome.response);
    if !outcome.tool_calls.is_empty() {
        reply.tool_calls = Some(outcome.tool_calls);
    }
    state.conversations.append(id, &reply).await?;

    Ok(outcome.response)
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "internal error"})),
    )
        .into_response()
}

async fn status_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.conversations.load_history(&id, usize::MAX).await {
        Ok(history) => (StatusCode::OK, Json(serde_json::json!({
            "conversation_id": id,
            "status": state.conversations.status(&id).as_str(),
            "exchanges": history,
        })))
            .into_response(),
        Err(e) => {
            warn!(conversation = %id, error = %e, "transcript readback failed");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid conversation id"})),
            )
                .into_response()
        }
    }
}

async fn confirm_handler(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> impl IntoResponse {
    match state.bookings.confirm(&booking_id).await {
        Ok(record) => Html(format!(
            "<html><body><h1>Appointment confirmed</h1>\
             <p>Your appointment on {} is confirmed. See you then!</p></body></html>",
            record.identity.start().format("%A %-d %B %Y at %H:%M")
        ))
        .into_response(),
        Err(BookingError::NotFound) => (
            StatusCode::NOT_FOUND,
            Html(
                "<html><body><h1>Link not valid</h1>\
                 <p>This confirmation link is no longer valid. If you believe this is a \
                 mistake, please get in touch.</p></body></html>"
                    .to_string(),
            ),
        )
            .into_response(),
        Err(e) => {
            error!(booking = %booking_id, error = %e, "confirmation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(
                    "<html><body><h1>Something went wrong</h1>\
                     <p>Please try the link again in a moment.</p></body></html>"
                        .to_string(),
                ),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn token_from_bearer_header() {
        let req = request("/api/chat", Some("s3cret"));
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn token_from_query_parameter() {
        let req = request("/api/chat?foo=1&token=s3cret", None);
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn header_wins_over_query() {
        let req = request("/api/chat?token=from-query", Some("from-header"));
        assert_eq!(presented_token(&req), Some("from-header"));
    }

    #[test]
    fn no_token_presented() {
        let req = request("/api/chat", None);
        assert_eq!(presented_token(&req), None);
    }
}
