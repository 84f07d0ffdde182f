// Read-only projection of the tracker for the UI layer
use crate::domain::geo::LatLon;
use crate::domain::position::RawSample;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingPhase {
    /// No session, no watchers
    Idle,
    /// Session start request in flight
    Starting,
    /// Subscription and flush timer live
    Watching,
    /// Session exists locally without a live subscription; resume is available
    Paused,
    /// Drain and stop request in flight
    Stopping,
}

impl TrackingPhase {
    pub fn is_busy(&self) -> bool {
        matches!(self, TrackingPhase::Starting | TrackingPhase::Stopping)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub phase: TrackingPhase,
    pub tracking: bool,
    pub watching: bool,
    pub resume_available: bool,
    pub busy: bool,
    pub session_id: Option<String>,
    pub session_started_at: Option<String>,
    pub duration_label: String,
    pub queue_len: usize,
    pub last_sent_at: Option<String>,
    pub distance_m: f64,
    pub distance_km: String,
    pub path_points: usize,
    pub raw_path: Vec<LatLon>,
    pub display_path: Vec<LatLon>,
    pub last_position: Option<RawSample>,
    pub last_position_label: String,
    pub last_error: Option<String>,
    pub activity: Vec<String>,
}

/// `1h 5m` above an hour, `4m 2s` below, `-` for negative durations
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 0 {
        return "-".to_string();
    }
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

pub fn format_distance_km(distance_m: f64) -> String {
    format!("{:.2}", (distance_m / 1000.0).max(0.0))
}

/// Elapsed time since an ISO-8601 start, if it parses
pub fn elapsed_since(started_at: &str, now_ms: i64) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(started_at)
        .ok()
        .map(|start| now_ms - start.timestamp_millis())
}
