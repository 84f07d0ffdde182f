use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const MIN_FLUSH_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TrackerConfig {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub location: LocationSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub token_type: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1/tracking".to_string(),
            token: None,
            token_type: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub distance_filter_m: f64,
    pub accuracy_filter_m: f64,
    pub avg_window_ms: i64,
    pub max_points_per_min: u32,
    pub max_path_points: usize,
    pub min_path_distance_m: f64,
    pub drain_attempts: usize,
    pub provider: String,
    pub smoothing_window: usize,
    pub simplify_epsilon_m: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_secs: 8,
            distance_filter_m: 10.0,
            accuracy_filter_m: 80.0,
            avg_window_ms: 3000,
            max_points_per_min: 6000,
            max_path_points: 1500,
            min_path_distance_m: 5.0,
            drain_attempts: 10,
            provider: "gps".to_string(),
            smoothing_window: 5,
            simplify_epsilon_m: 8.0,
        }
    }
}

impl PipelineSettings {
    /// Periodic flush interval, never shorter than two seconds
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(MIN_FLUSH_INTERVAL_SECS))
    }

    /// Reject values under which the pipeline would stall without an error
    pub fn validate(&self) -> anyhow::Result<()> {
        let counts = [
            ("batch_size", self.batch_size),
            ("max_path_points", self.max_path_points),
            ("smoothing_window", self.smoothing_window),
            ("drain_attempts", self.drain_attempts),
            ("max_points_per_min", self.max_points_per_min as usize),
        ];
        for (name, value) in counts {
            if value < 1 {
                bail!("pipeline.{} must be at least 1", name);
            }
        }
        if self.avg_window_ms <= 0 {
            bail!("pipeline.avg_window_ms must be positive");
        }
        if !(self.accuracy_filter_m.is_finite() && self.accuracy_filter_m > 0.0) {
            bail!("pipeline.accuracy_filter_m must be a positive number");
        }

        let distances = [
            ("distance_filter_m", self.distance_filter_m),
            ("min_path_distance_m", self.min_path_distance_m),
            ("simplify_epsilon_m", self.simplify_epsilon_m),
        ];
        for (name, value) in distances {
            if !(value.is_finite() && value >= 0.0) {
                bail!("pipeline.{} must be a non-negative number", name);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageSettings {
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LocationSettings {
    pub replay_file: Option<PathBuf>,
    pub replay_speed: f64,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            replay_file: None,
            replay_speed: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline.validate()?;
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be at least 1");
        }
        if !(self.location.replay_speed.is_finite() && self.location.replay_speed > 0.0) {
            bail!("location.replay_speed must be a positive number");
        }
        Ok(())
    }
}

/// Load `config/tracker.*` overlaid with `TRACKER__SECTION__KEY` env vars
pub fn load_tracker_config() -> anyhow::Result<TrackerConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/tracker").required(false))
        .add_source(
            config::Environment::with_prefix("TRACKER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    tracker_config_from(settings)
}

fn tracker_config_from(settings: config::Config) -> anyhow::Result<TrackerConfig> {
    let config: TrackerConfig = settings.try_deserialize()?;
    config.validate().context("Invalid tracker configuration")?;
    Ok(config)
}
