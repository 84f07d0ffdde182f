// Temporal averaging - folds raw samples within a time window into one point
use super::position::RawSample;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct OptionalSum {
    sum: f64,
    count: u32,
}

impl OptionalSum {
    fn seeded(value: Option<f64>) -> Self {
        let mut s = Self::default();
        s.add(value);
        s
    }

    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Accumulator for the samples of one averaging window
#[derive(Debug, Clone, PartialEq)]
pub struct AverageBucket {
    count: u32,
    sum_lat: f64,
    sum_lon: f64,
    accuracy: OptionalSum,
    speed: OptionalSum,
    heading: OptionalSum,
    first_ts_ms: i64,
    last_ts_ms: i64,
}

impl AverageBucket {
    pub fn new(sample: &RawSample) -> Self {
        Self {
            count: 1,
            sum_lat: sample.latitude,
            sum_lon: sample.longitude,
            accuracy: OptionalSum::seeded(sample.accuracy_m),
            speed: OptionalSum::seeded(sample.speed_mps),
            heading: OptionalSum::seeded(sample.heading_deg),
            first_ts_ms: sample.timestamp_ms,
            last_ts_ms: sample.timestamp_ms,
        }
    }

    pub fn add(&mut self, sample: &RawSample) {
        self.count += 1;
        self.sum_lat += sample.latitude;
        self.sum_lon += sample.longitude;
        self.accuracy.add(sample.accuracy_m);
        self.speed.add(sample.speed_mps);
        self.heading.add(sample.heading_deg);
        self.last_ts_ms = sample.timestamp_ms;
    }

    pub fn age_at(&self, ts_ms: i64) -> i64 {
        ts_ms - self.first_ts_ms
    }

    pub fn average(&self) -> AveragedPoint {
        let n = self.count as f64;
        AveragedPoint {
            lat: self.sum_lat / n,
            lon: self.sum_lon / n,
            accuracy_m: self.accuracy.mean(),
            speed_mps: self.speed.mean(),
            heading_deg: self.heading.mean(),
            timestamp_ms: self.last_ts_ms,
            sample_count: self.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AveragedPoint {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    /// Timestamp of the last folded sample
    pub timestamp_ms: i64,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleRejection {
    NonFinite,
    Accuracy { accuracy_m: f64, ceiling_m: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Rejected(SampleRejection),
    Folded,
    Emitted(AveragedPoint),
}

#[derive(Debug, Clone)]
pub struct TemporalAverager {
    window_ms: i64,
    accuracy_ceiling_m: f64,
    bucket: Option<AverageBucket>,
    first_point_sent: bool,
}

impl TemporalAverager {
    pub fn new(window_ms: i64, accuracy_ceiling_m: f64) -> Self {
        Self {
            window_ms,
            accuracy_ceiling_m,
            bucket: None,
            first_point_sent: false,
        }
    }

    pub fn ingest(&mut self, sample: &RawSample) -> Ingested {
        if !sample.has_finite_position() {
            return Ingested::Rejected(SampleRejection::NonFinite);
        }
        if let Some(accuracy_m) = sample.accuracy_m {
            if accuracy_m > self.accuracy_ceiling_m {
                return Ingested::Rejected(SampleRejection::Accuracy {
                    accuracy_m,
                    ceiling_m: self.accuracy_ceiling_m,
                });
            }
        }

        let Some(bucket) = self.bucket.as_mut() else {
            let bucket = AverageBucket::new(sample);
            if !self.first_point_sent {
                // First point of the session goes out without waiting for the window
                self.first_point_sent = true;
                return Ingested::Emitted(bucket.average());
            }
            self.bucket = Some(bucket);
            return Ingested::Folded;
        };

        if bucket.age_at(sample.timestamp_ms) >= self.window_ms {
            let closed = bucket.average();
            *bucket = AverageBucket::new(sample);
            return Ingested::Emitted(closed);
        }

        bucket.add(sample);
        Ingested::Folded
    }

    /// Close the open bucket regardless of its age
    pub fn force_emit(&mut self) -> Option<AveragedPoint> {
        self.bucket.take().map(|b| b.average())
    }

    pub fn reset(&mut self) {
        self.bucket = None;
        self.first_point_sent = false;
    }
}
