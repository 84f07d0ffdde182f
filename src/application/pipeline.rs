// Ingestion pipeline - raw samples to queued points and route path
use crate::domain::averaging::{AveragedPoint, Ingested, SampleRejection, TemporalAverager};
use crate::domain::geo::{self, LatLon};
use crate::domain::path::PathAccumulator;
use crate::domain::position::{iso_from_epoch_ms, QueuedPoint, RawSample};
use crate::domain::queue::PointQueue;
use crate::domain::rate_limit::RateLimiter;
use crate::infrastructure::config::PipelineSettings;

#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    Enqueued { queue_len: usize },
    RateLimited,
    TooClose { distance_m: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Rejected(SampleRejection),
    Buffered,
    Emitted(EmitOutcome),
}

impl SampleOutcome {
    pub fn enqueued(&self) -> bool {
        matches!(self, SampleOutcome::Emitted(EmitOutcome::Enqueued { .. }))
    }
}

/// Per-session pipeline state. Every method is synchronous, so a caller
/// holding the state lock sees each step applied atomically.
#[derive(Debug)]
pub struct PipelineState {
    settings: PipelineSettings,
    averager: TemporalAverager,
    limiter: RateLimiter,
    queue: PointQueue,
    path: PathAccumulator,
    last_accepted: Option<LatLon>,
    last_sample: Option<RawSample>,
}

impl PipelineState {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            averager: TemporalAverager::new(settings.avg_window_ms, settings.accuracy_filter_m),
            limiter: RateLimiter::new(settings.max_points_per_min),
            queue: PointQueue::new(),
            path: PathAccumulator::new(settings.max_path_points, settings.min_path_distance_m),
            last_accepted: None,
            last_sample: None,
            settings,
        }
    }

    pub fn ingest(&mut self, sample: RawSample, now_ms: i64) -> SampleOutcome {
        let outcome = match self.averager.ingest(&sample) {
            Ingested::Rejected(reason) => SampleOutcome::Rejected(reason),
            Ingested::Folded => SampleOutcome::Buffered,
            Ingested::Emitted(point) => SampleOutcome::Emitted(self.emit(point, now_ms)),
        };
        self.last_sample = Some(sample);
        outcome
    }

    /// Close the open averaging bucket, if any
    pub fn force_emit(&mut self, now_ms: i64) -> Option<EmitOutcome> {
        let point = self.averager.force_emit()?;
        Some(self.emit(point, now_ms))
    }

    fn emit(&mut self, averaged: AveragedPoint, now_ms: i64) -> EmitOutcome {
        if !self.limiter.allow(now_ms) {
            return EmitOutcome::RateLimited;
        }

        let position = LatLon::new(averaged.lat, averaged.lon);
        if let Some(last) = self.last_accepted {
            let distance_m = geo::distance_m(last, position);
            if distance_m < self.settings.distance_filter_m {
                return EmitOutcome::TooClose { distance_m };
            }
        }

        let provider = Some(self.settings.provider.clone()).filter(|p| !p.is_empty());
        self.queue.enqueue(QueuedPoint {
            event_id: uuid::Uuid::new_v4().to_string(),
            lat: averaged.lat,
            lon: averaged.lon,
            device_timestamp: iso_from_epoch_ms(averaged.timestamp_ms),
            accuracy_m: averaged.accuracy_m,
            speed_mps: averaged.speed_mps,
            heading_deg: averaged.heading_deg,
            provider,
            mock: false,
        });
        self.last_accepted = Some(position);
        self.path.add_point(averaged.lat, averaged.lon);

        EmitOutcome::Enqueued {
            queue_len: self.queue.len(),
        }
    }

    pub fn take_batch(&mut self) -> Vec<QueuedPoint> {
        self.queue.take_batch(self.settings.batch_size)
    }

    pub fn requeue_front(&mut self, batch: Vec<QueuedPoint>) {
        self.queue.requeue_front(batch);
    }

    /// Drops any open bucket so the next sample is sent immediately
    pub fn reset_averaging(&mut self) {
        self.averager.reset();
    }

    /// Fresh state for a newly started session
    pub fn reset_session(&mut self) {
        self.queue.clear();
        self.path.clear();
        self.last_accepted = None;
        self.averager.reset();
    }

    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn last_sample(&self) -> Option<&RawSample> {
        self.last_sample.as_ref()
    }

    pub fn distance_m(&self) -> f64 {
        self.path.distance_m()
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    pub fn raw_path(&self) -> Vec<LatLon> {
        self.path.points()
    }

    pub fn display_path(&self) -> Vec<LatLon> {
        self.path
            .display_path(self.settings.smoothing_window, self.settings.simplify_epsilon_m)
    }
}
