use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use crate::agent::{Agent, AgentRequest, StreamPart, ToolInvocation, GENERIC_FAILURE};
use crate::error::RelayError;
use crate::AgentRelay;

const MESSAGE_REQUIRED: &str = "Message is required";
const AGENT_NOT_FOUND: &str = "Agent not found";
const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";

#[derive(Clone)]
pub struct AppState {
    relay: Arc<AgentRelay>,
}

impl AppState {
    pub fn new(relay: Arc<AgentRelay>) -> Self {
        Self { relay }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChatParams {
    stream: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    status_message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    success: bool,
    response: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentTextResponse {
    success: bool,
    response: String,
    tool_invocations: Vec<ToolInvocation>,
    rounds: usize,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        status_code: status.as_u16(),
        status_message: message.to_string(),
    };
    (status, Json(body)).into_response()
}

fn generation_failed() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
}

/// Read `{message, conversationId?, userId?}`. The message must be a
/// non-empty string; anything else, including a body that is not JSON,
/// is rejected before an agent sees it.
fn parse_chat_body(body: &[u8]) -> Result<AgentRequest, Response> {
    let rejected = || error_response(StatusCode::BAD_REQUEST, MESSAGE_REQUIRED);
    let value: Value = serde_json::from_slice(body).map_err(|_| rejected())?;
    let message = match value.get("message").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => return Err(rejected()),
    };
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

    Ok(AgentRequest {
        message,
        user_id: field("userId"),
        conversation_id: field("conversationId"),
    })
}

async fn buffered(agent: Arc<Agent>, request: AgentRequest) -> Response {
    match agent.generate_text(request).await {
        Ok(reply) => Json(ChatResponse {
            success: true,
            response: reply.text,
        })
        .into_response(),
        Err(e) => {
            error!(agent = agent.name(), "Error generating response: {}", e);
            generation_failed()
        }
    }
}

/// Relay parts as SSE once the first one is known to be real output; a
/// failure before that is a plain 500.
async fn streamed(agent: Arc<Agent>, request: AgentRequest) -> Response {
    let mut parts = agent.stream_text(request);
    let first = match parts.next().await {
        Some(StreamPart::Error { .. }) | None => return generation_failed(),
        Some(part) => part,
    };

    let events = tokio_stream::once(first)
        .chain(parts)
        .map(|part| Ok::<Event, Infallible>(Event::default().data(serde_json::to_string(&part).unwrap_or_default())))
        .chain(tokio_stream::once(Ok(Event::default().data("[DONE]"))));

    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    response
        .headers_mut()
        .insert(STREAM_PROTOCOL_HEADER, HeaderValue::from_static("v1"));
    response
}

async fn chat(State(state): State<AppState>, Query(params): Query<ChatParams>, body: Bytes) -> Response {
    let request = match parse_chat_body(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    let agent = match state.relay.chat_agent() {
        Ok(agent) => agent,
        Err(e) => {
            error!("Error generating response: {}", e);
            return generation_failed();
        }
    };

    if params.stream.unwrap_or(true) {
        streamed(agent, request).await
    } else {
        buffered(agent, request).await
    }
}

fn lookup(state: &AppState, name: &str) -> Result<Arc<Agent>, Response> {
    state.relay.host().get(name).map_err(|e| match e {
        RelayError::AgentNotFound(_) => error_response(StatusCode::NOT_FOUND, AGENT_NOT_FOUND),
        other => {
            error!("agent lookup failed: {}", other);
            generation_failed()
        }
    })
}

async fn list_agents(State(state): State<AppState>) -> Response {
    Json(state.relay.host().summaries()).into_response()
}

async fn agent_text(State(state): State<AppState>, Path(name): Path<String>, body: Bytes) -> Response {
    let agent = match lookup(&state, &name) {
        Ok(agent) => agent,
        Err(rejection) => return rejection,
    };
    let request = match parse_chat_body(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };

    match agent.generate_text(request).await {
        Ok(reply) => Json(AgentTextResponse {
            success: true,
            response: reply.text,
            tool_invocations: reply.tool_invocations,
            rounds: reply.rounds,
        })
        .into_response(),
        Err(e) => {
            error!(agent = %name, "Error generating response: {}", e);
            generation_failed()
        }
    }
}

async fn agent_stream(State(state): State<AppState>, Path(name): Path<String>, body: Bytes) -> Response {
    let agent = match lookup(&state, &name) {
        Ok(agent) => agent,
        Err(rejection) => return rejection,
    };
    match parse_chat_body(&body) {
        Ok(request) => streamed(agent, request).await,
        Err(rejection) => rejection,
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "agents": state.relay.host().len() }))
}

pub fn router(relay: Arc<AgentRelay>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/agents", get(list_agents))
        .route("/agents/:name/text", post(agent_text))
        .route("/agents/:name/stream", post(agent_stream))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(relay))
}

pub async fn run_server(addr: SocketAddr, relay: Arc<AgentRelay>) -> anyhow::Result<()> {
    let app = router(relay);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("agentrelay listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
