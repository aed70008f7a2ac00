//! # Geographic Utilities
//!
//! Small geographic helpers shared by the aggregation and heatmap modules.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`route_length`] | Total length of a decoded route in meters |
//! | [`meters_per_degree`] | Meters per degree of latitude/longitude at a latitude |
//!
//! All functions expect WGS84 coordinates in degrees, as decoded from
//! Strava polylines.

use geo::{Distance, Haversine, Point};

use crate::GpsPoint;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Calculate the great-circle distance between two GPS points in meters.
///
/// # Example
///
/// ```rust
/// use strava_heatmap::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 5000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a route in meters.
///
/// Empty or single-point routes return 0.0.
pub fn route_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Meters per degree as `(latitude, longitude)` at the given latitude.
///
/// Longitude degrees shrink with cos(latitude); the factor is floored at
/// 0.1 so cells stay finite near the poles.
#[inline]
pub fn meters_per_degree(latitude: f64) -> (f64, f64) {
    let lng = METERS_PER_DEGREE * latitude.to_radians().cos().max(0.1);
    (METERS_PER_DEGREE, lng)
}
