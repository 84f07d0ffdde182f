// Position domain models - raw device samples and points queued for delivery
use super::geo::LatLon;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One reading from the location capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    /// Epoch milliseconds
    pub timestamp_ms: i64,
}

impl RawSample {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            speed_mps: None,
            heading_deg: None,
            timestamp_ms,
        }
    }

    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }

    pub fn has_finite_position(&self) -> bool {
        self.position().is_finite()
    }
}

/// An averaged, filtered point ready for transmission.
///
/// The `event_id` is assigned once and survives retries so the backend can
/// deduplicate redelivered batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedPoint {
    pub event_id: String,
    pub lat: f64,
    pub lon: f64,
    pub device_timestamp: String,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub mock: bool,
}

#[cfg(test)]
impl RawSample {
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:00:00.000Z`
pub fn iso_from_epoch_ms(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_iso_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Human readable position, e.g. `41.31110, 69.27970 (±12m)`
pub fn format_coords(sample: Option<&RawSample>) -> String {
    match sample {
        None => "No location yet".to_string(),
        Some(s) => {
            let accuracy = s
                .accuracy_m
                .map(|a| format!(" (±{}m)", a.round() as i64))
                .unwrap_or_default();
            format!("{:.5}, {:.5}{}", s.latitude, s.longitude, accuracy)
        }
    }
}
