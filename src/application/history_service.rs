// History service - Past sessions and their stored routes
use crate::application::tracking_api::TrackingApi;
use crate::domain::geo::{self, LatLon, PathBounds};
use crate::domain::session::{PointRow, PointsQuery, SessionSummary};
use crate::error::ApiError;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub session_id: String,
    pub points: Vec<PointRow>,
    pub path: Vec<LatLon>,
    pub bounds: Option<PathBounds>,
    pub center: Option<LatLon>,
    pub marker: Option<PointRow>,
    pub distance_m: f64,
    pub duration_ms: Option<i64>,
    pub truncated: bool,
    pub total: u64,
}

#[derive(Clone)]
pub struct HistoryService {
    api: Arc<dyn TrackingApi>,
}

impl HistoryService {
    pub fn new(api: Arc<dyn TrackingApi>) -> Self {
        Self { api }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let sessions = self.api.list_sessions().await?;
        if sessions.is_empty() {
            tracing::info!("History list is empty for this user");
        }
        Ok(sessions)
    }

    /// Load every stored point of a session, without server-side reduction
    pub async fn load_session(&self, session: &SessionSummary) -> Result<SessionDetails, ApiError> {
        let page = self
            .api
            .session_points(&session.session_id, PointsQuery::default())
            .await?;

        let path: Vec<LatLon> = page
            .points
            .iter()
            .map(|p| LatLon::new(p.lat, p.lon))
            .filter(LatLon::is_finite)
            .collect();

        tracing::debug!(
            "Loaded {} points for session {} (truncated: {})",
            page.points.len(),
            session.session_id,
            page.truncated
        );

        Ok(SessionDetails {
            session_id: session.session_id.clone(),
            bounds: geo::path_bounds(&path),
            center: geo::path_center(&path),
            marker: page.points.last().cloned(),
            distance_m: geo::path_length_m(&path),
            duration_ms: session_duration_ms(session, &page.points),
            total: page.total.unwrap_or(page.points.len() as u64),
            truncated: page.truncated,
            points: page.points,
            path,
        })
    }

    /// Look up a session summary by id, then load its details
    pub async fn load_session_by_id(&self, session_id: &str) -> Result<Option<SessionDetails>, ApiError> {
        let sessions = self.api.list_sessions().await?;
        match sessions.into_iter().find(|s| s.session_id == session_id) {
            Some(session) => Ok(Some(self.load_session(&session).await?)),
            None => Ok(None),
        }
    }
}

fn parse_ms(value: Option<&str>) -> Option<i64> {
    value
        .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.timestamp_millis())
}

/// Stop minus start when both are known, else last minus first point
fn session_duration_ms(session: &SessionSummary, points: &[PointRow]) -> Option<i64> {
    let start = parse_ms(session.start_time.as_deref());
    let stop = parse_ms(session.stop_time.as_deref());
    if let (Some(start), Some(stop)) = (start, stop) {
        return Some((stop - start).max(0));
    }

    let first = parse_ms(points.first().and_then(|p| p.ts.as_deref()));
    let last = parse_ms(points.last().and_then(|p| p.ts.as_deref()));
    match (first, last) {
        (Some(first), Some(last)) => Some((last - first).max(0)),
        _ => None,
    }
}
