// Location providers for headless runs: recorded track replay, or none at all
use crate::application::location_provider::{LocationProvider, SampleStream};
use crate::domain::position::RawSample;
use crate::error::LocationError;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Replays an NDJSON track file, one `RawSample` per line.
///
/// Samples are paced by their recorded timestamp deltas divided by `speed`,
/// and re-stamped with the wall clock as they are emitted so downstream
/// windows behave as they would for a live receiver.
#[derive(Debug, Clone)]
pub struct ReplayLocationProvider {
    path: PathBuf,
    speed: f64,
}

impl ReplayLocationProvider {
    pub fn new(path: impl Into<PathBuf>, speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        Self {
            path: path.into(),
            speed,
        }
    }
}

/// Blank lines and `#` comments are skipped, as are lines that do not parse
fn parse_replay_line(line_no: usize, line: &str) -> Option<RawSample> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match serde_json::from_str::<RawSample>(line) {
        Ok(sample) => Some(sample),
        Err(e) => {
            tracing::warn!("Skipping replay line {}: {}", line_no, e);
            None
        }
    }
}

async fn read_samples(path: &Path) -> Result<Vec<RawSample>, LocationError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        tracing::error!("Cannot open replay file {}: {}", path.display(), e);
        LocationError::PositionUnavailable
    })?;
    Ok(contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_replay_line(i + 1, line))
        .collect())
}

fn restamp(mut sample: RawSample) -> RawSample {
    sample.timestamp_ms = chrono::Utc::now().timestamp_millis();
    sample
}

#[async_trait]
impl LocationProvider for ReplayLocationProvider {
    fn is_available(&self) -> bool {
        true
    }

    fn watch(&self) -> SampleStream {
        let path = self.path.clone();
        let speed = self.speed;

        let stream = async_stream::stream! {
            let samples = match read_samples(&path).await {
                Ok(samples) => samples,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            tracing::info!("Replaying {} samples from {}", samples.len(), path.display());

            let mut previous: Option<i64> = None;
            for sample in samples {
                if let Some(prev) = previous {
                    let delay_ms = ((sample.timestamp_ms - prev).max(0) as f64 / speed) as u64;
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                previous = Some(sample.timestamp_ms);
                yield Ok(restamp(sample));
            }
            tracing::info!("Replay of {} finished", path.display());
        };
        stream.boxed()
    }

    async fn current_position(&self) -> Result<RawSample, LocationError> {
        read_samples(&self.path)
            .await?
            .into_iter()
            .next()
            .map(restamp)
            .ok_or(LocationError::PositionUnavailable)
    }
}

/// Stand-in for environments with no location capability
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLocationProvider;

#[async_trait]
impl LocationProvider for UnavailableLocationProvider {
    fn is_available(&self) -> bool {
        false
    }

    fn watch(&self) -> SampleStream {
        futures::stream::empty().boxed()
    }

    async fn current_position(&self) -> Result<RawSample, LocationError> {
        Err(LocationError::PositionUnavailable)
    }
}
