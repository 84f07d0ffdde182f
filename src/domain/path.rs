// Bounded route polyline with a running distance
use super::geo::{self, LatLon};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct PathAccumulator {
    points: VecDeque<LatLon>,
    capacity: usize,
    min_step_m: f64,
    distance_m: f64,
}

impl PathAccumulator {
    pub fn new(capacity: usize, min_step_m: f64) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            min_step_m,
            distance_m: 0.0,
        }
    }

    /// Append unless closer than the minimum step to the last point.
    /// Returns whether the point was appended.
    pub fn add_point(&mut self, lat: f64, lon: f64) -> bool {
        let next = LatLon::new(lat, lon);
        if let Some(last) = self.points.back() {
            let d = geo::distance_m(*last, next);
            if d < self.min_step_m {
                return false;
            }
            self.distance_m += d;
        }

        self.points.push_back(next);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        true
    }

    pub fn points(&self) -> Vec<LatLon> {
        self.points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Smoothed then simplified copy of the path for display
    pub fn display_path(&self, smoothing_window: usize, epsilon_m: f64) -> Vec<LatLon> {
        let raw = self.points();
        if raw.len() < 2 {
            return raw;
        }
        let smoothed = geo::smooth_path(&raw, smoothing_window);
        geo::simplify_rdp(&smoothed, epsilon_m)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.distance_m = 0.0;
    }
}
