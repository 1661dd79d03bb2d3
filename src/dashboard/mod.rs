//! HTTP and WebSocket control surface
//!
//! Routes:
//! - `GET /` - service info
//! - `GET /health`, `GET /metrics`
//! - `GET /api/personas/defaults`
//! - `POST /api/run-tests` - start a session
//! - `GET|DELETE /api/test-sessions/:id`, `GET /api/test-sessions/:id/report`
//! - `GET /api/test-sessions/:id/logs` - WebSocket stream of log events

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::metrics;
use crate::personas::{default_personas, Persona};
use crate::session::{
    Delivery, SessionError, SessionManager, SessionRequest, SessionStatus, Subscription,
};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Body of `POST /api/run-tests`
#[derive(Debug, Deserialize)]
pub struct RunTestsRequest {
    /// Built-in personas are used when omitted
    #[serde(default)]
    pub personas: Option<Vec<Persona>>,
    pub test_goal: String,
    pub api_url: String,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RunTestsResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub report: Option<String>,
}

/// Session errors mapped onto HTTP status codes
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Build the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/personas/defaults", get(persona_defaults))
        .route("/api/run-tests", post(run_tests))
        .route(
            "/api/test-sessions/:id",
            get(session_status).delete(cancel_session),
        )
        .route("/api/test-sessions/:id/report", get(session_report))
        .route("/api/test-sessions/:id/logs", get(session_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.manager.config();
    Json(json!({
        "service": "personaflow",
        "version": env!("CARGO_PKG_VERSION"),
        "model": config.model,
        "default_max_steps": config.max_steps,
        "active_sessions": state.manager.list().iter().filter(|s| !s.status.is_terminal()).count(),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

async fn persona_defaults() -> impl IntoResponse {
    Json(default_personas())
}

async fn run_tests(
    State(state): State<AppState>,
    Json(body): Json<RunTestsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = SessionRequest {
        personas: body.personas.unwrap_or_else(default_personas),
        goal: body.test_goal,
        target_api_url: body.api_url,
        max_steps: body.max_steps,
    };
    let session_id = state.manager.start_session(request)?;
    info!(session_id = %session_id, "Test run accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunTestsResponse {
            session_id,
            status: SessionStatus::Running,
        }),
    ))
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.inspect(&id)?))
}

async fn session_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.manager.get(&id)?;
    Ok(Json(ReportResponse {
        session_id: id,
        status: session.status(),
        report: session.final_report(),
    }))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.cancel(&id)?;
    Ok(StatusCode::ACCEPTED)
}

/// Upgrade to a WebSocket streaming the session's events
///
/// The session is resolved before the upgrade so an unknown id gets a 404.
async fn session_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let subscription = state.manager.attach(&id)?;
    let Some(ws) = ws else {
        return Ok((StatusCode::UPGRADE_REQUIRED, "expected a WebSocket upgrade").into_response());
    };
    info!(session_id = %id, "Log observer connected");
    Ok(ws.on_upgrade(move |socket| stream_events(socket, id, subscription)))
}

async fn stream_events(mut socket: WebSocket, session_id: String, mut subscription: Subscription) {
    loop {
        tokio::select! {
            delivery = subscription.next() => {
                let Some(delivery) = delivery else { break };
                let frame = match delivery {
                    Delivery::Event(event) => serde_json::to_string(&event),
                    Delivery::Dropped(count) => {
                        serde_json::to_string(&json!({ "type": "dropped", "count": count }))
                    }
                };
                let Ok(text) = frame else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    debug!(session_id = %session_id, "Log observer went away");
                    return;
                }
            }
            incoming = socket.recv() => match incoming {
                // Anything else the client sends is ignored
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(session_id = %session_id, "Log observer disconnected");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    // Channel closed after the terminal event
    let _ = socket.send(Message::Close(None)).await;
    debug!(session_id = %session_id, "Log stream finished");
}
