// Application state for HTTP handlers
use crate::application::history_service::HistoryService;
use crate::application::tracking_service::TrackingService;

#[derive(Clone)]
pub struct AppState {
    pub tracking_service: TrackingService,
    pub history_service: HistoryService,
}
