//! Spherical-earth helpers shared by the animator, ETA and de-collision code.

use ::geo::{Destination, Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(p: GeoPoint) -> Self {
        Point::new(p.lng, p.lat)
    }
}

impl From<Point<f64>> for GeoPoint {
    fn from(p: Point<f64>) -> Self {
        GeoPoint::new(p.y(), p.x())
    }
}

/// Wraps any angle into `[0, 360)`.
pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed turn from `from` to `to` along the shorter arc, in `(-180, 180]`.
pub fn shortest_rotation(from: f64, to: f64) -> f64 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

/// Initial great-circle bearing from `from` to `to` in `[0, 360)`.
/// Identical points return 0 rather than failing.
pub fn calculate_bearing(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` along a great circle starting at
/// `bearing_deg`. Longitude is kept in `[-180, 180]`.
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let mut target: GeoPoint =
        Haversine::destination(Point::from(origin), bearing_deg, distance_m).into();
    if target.lng > 180.0 {
        target.lng -= 360.0;
    } else if target.lng < -180.0 {
        target.lng += 360.0;
    }
    target
}

/// Great-circle distance in metres on the mean earth radius.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    Haversine::distance(Point::from(a), Point::from(b))
}

/// Linear interpolation in lat/lng space. `t` is not clamped here.
pub fn lerp_position(from: GeoPoint, to: GeoPoint, t: f64) -> GeoPoint {
    GeoPoint::new(
        from.lat + (to.lat - from.lat) * t,
        from.lng + (to.lng - from.lng) * t,
    )
}

/// Arithmetic mean of a set of nearby points. `None` when empty.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lng) = points
        .iter()
        .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
    Some(GeoPoint::new(lat / n, lng / n))
}
