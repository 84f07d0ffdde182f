// Session domain models - identity record and backend session/point views
use serde::{Deserialize, Serialize};

/// Locally persisted identity of the active session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: String,
}

impl SessionRecord {
    pub fn new(session_id: String, started_at: String) -> Self {
        Self {
            session_id,
            started_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSessionRequest {
    pub stop_time: String,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub accepted: u64,
    #[serde(default)]
    pub inserted: u64,
}

/// Row of `GET /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_point_at: Option<String>,
}

/// Stored point as returned by `GET /sessions/{id}/points`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointRow {
    #[serde(default)]
    pub ts: Option<String>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointsPage {
    #[serde(default)]
    pub points: Vec<PointRow>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointsQuery {
    pub max: u32,
    pub downsample: bool,
    pub simplify_eps_m: f64,
}

impl Default for PointsQuery {
    fn default() -> Self {
        Self {
            max: 2000,
            downsample: false,
            simplify_eps_m: 0.0,
        }
    }
}
