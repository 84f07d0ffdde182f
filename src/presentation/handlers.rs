// HTTP request handlers
use crate::application::tracking_service::TrackingService;
use crate::error::{ApiError, TrackerError};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn tracker_error_response(error: TrackerError) -> Response {
    let status = match &error {
        TrackerError::CapabilityUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        TrackerError::Busy | TrackerError::AlreadyWatching | TrackerError::Cancelled => {
            StatusCode::CONFLICT
        }
        TrackerError::NoSession => StatusCode::NOT_FOUND,
        TrackerError::Api { .. } => StatusCode::BAD_GATEWAY,
    };
    error_response(status, error.to_string())
}

fn api_error_response(error: ApiError) -> Response {
    tracing::error!("Backend request failed: {}", error);
    error_response(StatusCode::BAD_GATEWAY, error.to_string())
}

/// Run a lifecycle operation on its own task so a dropped client
/// connection cannot cancel it halfway, then report the resulting state.
async fn run_lifecycle<F, Fut>(service: &TrackingService, op: F) -> Response
where
    F: FnOnce(TrackingService) -> Fut,
    Fut: Future<Output = Result<(), TrackerError>> + Send + 'static,
{
    match tokio::spawn(op(service.clone())).await {
        Ok(Ok(())) => Json(service.snapshot()).into_response(),
        Ok(Err(e)) => tracker_error_response(e),
        Err(e) => {
            tracing::error!("Lifecycle task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "lifecycle task failed")
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.tracking_service.snapshot())
}

pub async fn start_tracking(State(state): State<Arc<AppState>>) -> Response {
    run_lifecycle(&state.tracking_service, |s| async move { s.start().await }).await
}

pub async fn resume_tracking(State(state): State<Arc<AppState>>) -> Response {
    run_lifecycle(&state.tracking_service, |s| async move { s.resume().await }).await
}

pub async fn stop_tracking(State(state): State<Arc<AppState>>) -> Response {
    run_lifecycle(&state.tracking_service, |s| async move { s.stop().await }).await
}

pub async fn logout_tracking(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tracking_service.logout();
    Json(state.tracking_service.snapshot())
}

pub async fn list_history(State(state): State<Arc<AppState>>) -> Response {
    match state.history_service.list_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => api_error_response(e),
    }
}

/// Stored route of one past session
pub async fn get_session_history(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.history_service.load_session_by_id(&session_id).await {
        Ok(Some(details)) => Json(details).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("session {} not found", session_id),
        ),
        Err(e) => api_error_response(e),
    }
}
