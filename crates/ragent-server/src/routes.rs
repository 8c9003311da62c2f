// HTTP routes
//
// GET  /health       service status plus the configured model and tools
// POST /invocations  one chat turn; JSON, or SSE when the request sets "stream"

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use ragent_core::{
    AgentLoopError, BoxedLlmDriver, ChatAgent, ChatAgentChunk, ChatAgentRequest, ToolRegistry,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

/// The agent as served: any LLM driver, tools from the registry
pub type ServedAgent = ChatAgent<BoxedLlmDriver, ToolRegistry>;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub agent: ServedAgent,
}

impl AppState {
    pub fn new(agent: ServedAgent) -> Self {
        Self { agent }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invocations", post(invocations))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
    tools: Vec<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let conversation_loop = state.agent.conversation_loop();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: conversation_loop.config().model.clone(),
        tools: conversation_loop
            .tool_executor()
            .tool_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

async fn invocations(
    State(state): State<AppState>,
    Json(request): Json<ChatAgentRequest>,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError(AgentLoopError::NoMessages));
    }

    if !request.stream {
        let response = state.agent.predict(request).await?;
        return Ok(Json(response).into_response());
    }

    tracing::info!(
        message_count = request.messages.len(),
        "Starting invocation stream"
    );

    let events = state
        .agent
        .predict_stream(request)
        .map(|item| Ok::<_, Infallible>(chunk_event(item)));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn chunk_event(item: Result<ChatAgentChunk, AgentLoopError>) -> Event {
    match item {
        Ok(chunk) => Event::default()
            .json_data(&chunk)
            .unwrap_or_else(|e| error_event(&e.to_string())),
        Err(e) => {
            tracing::error!(error = %e, "Invocation stream failed");
            error_event(&public_message(&e))
        }
    }
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

// ============================================================================
// Errors
// ============================================================================

/// Agent failure rendered as an HTTP response with body `{"error": ...}`
#[derive(Debug)]
pub struct ApiError(AgentLoopError);

impl From<AgentLoopError> for ApiError {
    fn from(err: AgentLoopError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            AgentLoopError::NoMessages | AgentLoopError::Configuration(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentLoopError::LlmTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentLoopError::Llm(_) => StatusCode::BAD_GATEWAY,
            AgentLoopError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Invocation failed");
        }
        (status, Json(json!({ "error": public_message(&self.0) }))).into_response()
    }
}

/// Error text safe to return to callers
fn public_message(err: &AgentLoopError) -> String {
    match err {
        AgentLoopError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}
