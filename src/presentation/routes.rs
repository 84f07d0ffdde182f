// Route table for the control surface
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_session_history, get_status, health_check, list_history, logout_tracking,
    resume_tracking, start_tracking, stop_tracking,
};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(get_status))
        .route("/tracking/start", post(start_tracking))
        .route("/tracking/resume", post(resume_tracking))
        .route("/tracking/stop", post(stop_tracking))
        .route("/tracking/logout", post(logout_tracking))
        .route("/history", get(list_history))
        .route("/history/:id", get(get_session_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
