use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use log::{info, warn};

use crate::data::{BackgroundRefresher, RefreshCommand, RefreshState};

#[derive(Clone)]
pub struct ApiState {
    pub refresher: Arc<BackgroundRefresher>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub state: RefreshState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub symbols: Vec<String>,
    pub interval_secs: u64,
    pub last_cycle: Option<u64>,
}

// GET /api/health - Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "stock_stream_api",
        "timestamp": chrono::Utc::now()
    }))
}

// GET /api/stocks - Latest published refresh batch
pub async fn latest_stocks(State(state): State<ApiState>) -> Response {
    match state.refresher.latest() {
        Some(batch) => Json(batch.as_ref().clone()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "No refresh cycle has completed yet"
            })),
        )
            .into_response(),
    }
}

// POST /api/refresh/start
pub async fn start_refresh(State(state): State<ApiState>) -> (StatusCode, Json<RefreshResponse>) {
    run_command(&state, RefreshCommand::Start)
}

// POST /api/refresh/stop
pub async fn stop_refresh(State(state): State<ApiState>) -> (StatusCode, Json<RefreshResponse>) {
    run_command(&state, RefreshCommand::Stop)
}

// POST /api/refresh/restart
pub async fn restart_refresh(State(state): State<ApiState>) -> (StatusCode, Json<RefreshResponse>) {
    run_command(&state, RefreshCommand::Restart)
}

// GET /api/refresh/status
pub async fn refresh_status(State(state): State<ApiState>) -> Json<RefreshStatus> {
    Json(RefreshStatus {
        state: state.refresher.state(),
        symbols: state.refresher.universe().to_vec(),
        interval_secs: state.refresher.interval().as_secs(),
        last_cycle: state.refresher.latest().map(|batch| batch.cycle),
    })
}

fn run_command(state: &ApiState, command: RefreshCommand) -> (StatusCode, Json<RefreshResponse>) {
    match state.refresher.execute_command(command.clone()) {
        Ok(message) => {
            info!("Refresh command {:?} succeeded", command);
            (
                StatusCode::OK,
                Json(RefreshResponse {
                    success: true,
                    message,
                    state: state.refresher.state(),
                }),
            )
        }
        Err(message) => {
            warn!("Refresh command {:?} rejected: {}", command, message);
            (
                StatusCode::CONFLICT,
                Json(RefreshResponse {
                    success: false,
                    message,
                    state: state.refresher.state(),
                }),
            )
        }
    }
}

// Create the API router
pub fn create_api_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stocks", get(latest_stocks))
        .route("/refresh/start", post(start_refresh))
        .route("/refresh/stop", post(stop_refresh))
        .route("/refresh/restart", post(restart_refresh))
        .route("/refresh/status", get(refresh_status))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
}
