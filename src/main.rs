// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod error;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

use crate::application::history_service::HistoryService;
use crate::application::location_provider::LocationProvider;
use crate::application::session_store::{MemorySessionStore, SessionStore};
use crate::application::tracking_api::TrackingApi;
use crate::application::tracking_service::TrackingService;
use crate::infrastructure::config::load_tracker_config;
use crate::infrastructure::file_session_store::FileSessionStore;
use crate::infrastructure::http_api::HttpTrackingApi;
use crate::infrastructure::replay_location::{ReplayLocationProvider, UnavailableLocationProvider};
use crate::presentation::app_state::AppState;
use crate::presentation::routes::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_tracker_config()?;

    // Create adapters (infrastructure layer)
    let api: Arc<dyn TrackingApi> = Arc::new(HttpTrackingApi::new(&config.api)?);
    let store: Arc<dyn SessionStore> = match &config.storage.session_file {
        Some(path) => Arc::new(FileSessionStore::new(path)),
        None => Arc::new(MemorySessionStore::new()),
    };
    let locations: Arc<dyn LocationProvider> = match &config.location.replay_file {
        Some(path) => Arc::new(ReplayLocationProvider::new(path, config.location.replay_speed)),
        None => {
            tracing::warn!("No location source configured; start will report it as unavailable");
            Arc::new(UnavailableLocationProvider)
        }
    };

    // Create services (application layer)
    let tracking_service = TrackingService::new(api.clone(), locations, store, config.pipeline);
    let history_service = HistoryService::new(api);

    let state = Arc::new(AppState {
        tracking_service,
        history_service,
    });

    // Build router (presentation layer)
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server.bind_addr.parse()?;
    tracing::info!("Starting field-tracker on {} (backend {})", addr, config.api.base_url);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
