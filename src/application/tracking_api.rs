// Port for the remote tracking backend
use crate::domain::position::QueuedPoint;
use crate::domain::session::{
    IngestResponse, PointsPage, PointsQuery, SessionSummary, StartSessionResponse,
    StopSessionRequest,
};
use crate::error::ApiError;
use async_trait::async_trait;

#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// `POST /sessions/start`
    async fn start_session(&self) -> Result<StartSessionResponse, ApiError>;

    /// `POST /sessions/{id}/stop`
    async fn stop_session(&self, session_id: &str, request: &StopSessionRequest) -> Result<(), ApiError>;

    /// `POST /sessions/{id}/points`
    async fn ingest_points(&self, session_id: &str, points: &[QueuedPoint]) -> Result<IngestResponse, ApiError>;

    /// `GET /sessions`
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError>;

    /// `GET /sessions/{id}/points`
    async fn session_points(&self, session_id: &str, query: PointsQuery) -> Result<PointsPage, ApiError>;
}
