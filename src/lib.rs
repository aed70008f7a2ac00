//! # Strava Heatmap
//!
//! Strava OAuth session handling, encoded polyline decoding and activity
//! heatmap layers.
//!
//! This library provides:
//! - A decoder for Google encoded polylines (Strava's `summary_polyline`)
//! - An OAuth token lifecycle state machine with a persisted credential slot
//! - Activity fetching from the Strava API with one refresh-and-retry on 401
//! - Aggregation of decoded routes into a heatmap layer for a map renderer
//!
//! ## Features
//!
//! - **`http`** (default) - Enable the Strava HTTP client
//! - **`parallel`** - Decode activity polylines in parallel with rayon
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use strava_heatmap::polyline;
//!
//! let points = polyline::decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
//! assert_eq!(points.len(), 3);
//! assert!((points[1].latitude - 40.7).abs() < 1e-9);
//!
//! let bounds = strava_heatmap::Bounds::from_points(&points).unwrap();
//! assert!(bounds.max_lat > bounds.min_lat);
//! ```

use geo::Coord;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{HeatmapError, Result};

pub mod geo_utils;

// Encoded polyline decoding
pub mod polyline;
pub use polyline::PolylineError;

// Credential persistence
pub mod store;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

// OAuth token lifecycle
pub mod session;
pub use session::{Credential, SessionManager, SessionState, TokenEndpoint};

// Configuration
pub mod config;
pub use config::{FetchConfig, OAuthConfig};

// Activity model and polyline aggregation
pub mod activity;
pub use activity::{aggregate_activities, Activity, ActivityMap, Aggregate};

// Heatmap layer handed to the renderer
pub mod heatmap;
pub use heatmap::{
    generate_heatmap, HeatLayer, HeatmapCell, HeatmapConfig, HeatmapRenderer, HeatmapResult,
    JsonRenderer, MapView, TileLayerConfig,
};

// Session -> fetch -> decode -> render orchestration
pub mod app;
pub use app::{ActivitySource, HeatmapApp, Status};

// HTTP module for Strava
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{authorization_code_from_redirect, authorize_url, StravaClient};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use strava_heatmap::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

impl From<GpsPoint> for Coord<f64> {
    fn from(p: GpsPoint) -> Self {
        Coord { x: p.longitude, y: p.latitude }
    }
}

impl From<Coord<f64>> for GpsPoint {
    fn from(c: Coord<f64>) -> Self {
        GpsPoint::new(c.y, c.x)
    }
}

/// Bounding box for a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self { min_lat, max_lat, min_lng, max_lng })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Check whether a point falls inside the bounds (inclusive).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Tests
// ============================================================================
