// Geo math - Distances, path smoothing and simplification
use serde::Serialize;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PathBounds {
    pub min: LatLon,
    pub max: LatLon,
}

impl PathBounds {
    pub fn center(&self) -> LatLon {
        LatLon::new(
            (self.min.lat + self.max.lat) / 2.0,
            (self.min.lon + self.max.lon) / 2.0,
        )
    }
}

/// Great-circle distance in meters (haversine)
pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Sum of segment distances along a path
pub fn path_length_m(points: &[LatLon]) -> f64 {
    points.windows(2).map(|w| distance_m(w[0], w[1])).sum()
}

/// Centered moving average over `window_size` points.
/// Paths of two points or fewer, and windows of one, are returned as-is.
pub fn smooth_path(points: &[LatLon], window_size: usize) -> Vec<LatLon> {
    if points.len() <= 2 || window_size <= 1 {
        return points.to_vec();
    }

    let half = window_size / 2;
    (0..points.len())
        .map(|idx| {
            let from = idx.saturating_sub(half);
            let to = (idx + half).min(points.len() - 1);
            let neighbours = &points[from..=to];
            let count = neighbours.len() as f64;
            let sum_lat: f64 = neighbours.iter().map(|p| p.lat).sum();
            let sum_lon: f64 = neighbours.iter().map(|p| p.lon).sum();
            LatLon::new(sum_lat / count, sum_lon / count)
        })
        .collect()
}

/// Ramer-Douglas-Peucker simplification with a tolerance in meters
pub fn simplify_rdp(points: &[LatLon], epsilon_m: f64) -> Vec<LatLon> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];

    let mut index = 0;
    let mut max_dist = 0.0;
    for (i, p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = perpendicular_distance_m(*p, first, last);
        if d > max_dist {
            index = i;
            max_dist = d;
        }
    }

    if max_dist > epsilon_m {
        let mut left = simplify_rdp(&points[..=index], epsilon_m);
        let right = simplify_rdp(&points[index..], epsilon_m);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

pub fn path_bounds(points: &[LatLon]) -> Option<PathBounds> {
    let first = points.first()?;
    let mut bounds = PathBounds {
        min: *first,
        max: *first,
    };
    for p in &points[1..] {
        bounds.min.lat = bounds.min.lat.min(p.lat);
        bounds.min.lon = bounds.min.lon.min(p.lon);
        bounds.max.lat = bounds.max.lat.max(p.lat);
        bounds.max.lon = bounds.max.lon.max(p.lon);
    }
    Some(bounds)
}

pub fn path_center(points: &[LatLon]) -> Option<LatLon> {
    path_bounds(points).map(|b| b.center())
}

/// Distance from `p` to segment `a`-`b`, projected onto a local
/// equirectangular plane centered on the segment's mid latitude
fn perpendicular_distance_m(p: LatLon, a: LatLon, b: LatLon) -> f64 {
    let lat0 = ((a.lat + b.lat) / 2.0).to_radians();
    let project = |q: LatLon| {
        (
            q.lon.to_radians() * lat0.cos() * EARTH_RADIUS_M,
            q.lat.to_radians() * EARTH_RADIUS_M,
        )
    };
    let (ax, ay) = project(a);
    let (bx, by) = project(b);
    let (px, py) = project(p);

    let dx = bx - ax;
    let dy = by - ay;
    if dx == 0.0 && dy == 0.0 {
        return (px - ax).hypot(py - ay);
    }

    let t = (((px - ax) * dx + (py - ay) * dy) / (dx * dx + dy * dy)).clamp(0.0, 1.0);
    let proj_x = ax + t * dx;
    let proj_y = ay + t * dy;
    (px - proj_x).hypot(py - proj_y)
}
