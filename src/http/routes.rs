//! HTTP route definitions
//!
//! Anything under `STATIC_DIR` is served as-is. A hosted browser client has to
//! speak the plain `{"event", "data"}` JSON framing of `/ws`; a Socket.IO
//! client bundle will not connect unchanged.

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origins);

    // Browser client is served from the static directory
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .fallback_service(static_files)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Allow-list from CLIENT_ORIGIN, or any origin when none is configured
fn cors_layer(client_origins: &[String]) -> CorsLayer {
    if client_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any);
    }

    let allowed_origins: Vec<header::HeaderValue> = client_origins
        .iter()
        .filter_map(|origin| match origin.parse::<header::HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    phase: &'static str,
    players: usize,
    connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let summary = state
        .coordinator
        .status()
        .await
        .ok_or(AppError::CoordinatorUnavailable)?;

    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        phase: summary.phase,
        players: summary.players,
        connections: summary.connections,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Match coordinator is not running")]
    CoordinatorUnavailable,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::CoordinatorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}
