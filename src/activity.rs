//! Strava activities and the decode-and-concatenate step.
//!
//! Only the fields needed for the heatmap are modelled; everything else in
//! the API response is ignored.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::HeatmapError;
use crate::{geo_utils, polyline, GpsPoint};

/// A summary activity from `GET /athlete/activities`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sport_type: Option<String>,
    /// Distance in meters as reported by Strava
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub map: Option<ActivityMap>,
}

/// Route geometry attached to an activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityMap {
    #[serde(default)]
    pub id: Option<String>,
    /// Simplified route, present on summary activities
    #[serde(default)]
    pub summary_polyline: Option<String>,
    /// Full-resolution route, present on detailed activities
    #[serde(default)]
    pub polyline: Option<String>,
}

impl Activity {
    /// The encoded route, preferring the summary polyline. Empty strings
    /// count as no route (manual and indoor activities).
    pub fn encoded_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.summary_polyline
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| map.polyline.as_deref().filter(|s| !s.is_empty()))
    }

    /// Decode this activity's route.
    ///
    /// `Ok(None)` when the activity has no route.
    pub fn decode_route(&self) -> Result<Option<Vec<GpsPoint>>, HeatmapError> {
        let Some(encoded) = self.encoded_polyline() else {
            return Ok(None);
        };
        polyline::decode(encoded)
            .map(Some)
            .map_err(|source| HeatmapError::Polyline {
                activity_id: self.id.to_string(),
                source,
            })
    }
}

/// Decoded points from a batch of activities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// All decoded points, each activity's route kept in order
    pub points: Vec<GpsPoint>,
    /// Activities that contributed a route
    pub decoded_activities: u32,
    /// Activities without a route
    pub skipped_activities: u32,
    /// Activities whose polyline could not be decoded
    pub failed: Vec<HeatmapError>,
    /// Sum of decoded route lengths in meters
    pub total_distance_meters: f64,
}

impl Aggregate {
    /// Fold one more activity's decode result into the aggregate.
    fn push(&mut self, result: Result<Option<Vec<GpsPoint>>, HeatmapError>) {
        match result {
            Ok(Some(route)) => {
                self.total_distance_meters += geo_utils::route_length(&route);
                self.points.extend(route);
                self.decoded_activities += 1;
            }
            Ok(None) => self.skipped_activities += 1,
            Err(e) => {
                warn!("[Aggregate] Skipping activity: {}", e);
                self.failed.push(e);
            }
        }
    }
}

/// Decode every activity's route and concatenate the points.
///
/// Activities without a route contribute nothing. A malformed polyline
/// drops only that activity; it is logged and listed in
/// [`Aggregate::failed`].
pub fn aggregate_activities(activities: &[Activity]) -> Aggregate {
    let mut aggregate = Aggregate::default();
    for result in decode_all(activities) {
        aggregate.push(result);
    }

    info!(
        "[Aggregate] {} activities: {} decoded ({} points), {} without route, {} failed",
        activities.len(),
        aggregate.decoded_activities,
        aggregate.points.len(),
        aggregate.skipped_activities,
        aggregate.failed.len()
    );
    aggregate
}

#[cfg(not(feature = "parallel"))]
fn decode_all(activities: &[Activity]) -> Vec<Result<Option<Vec<GpsPoint>>, HeatmapError>> {
    activities.iter().map(Activity::decode_route).collect()
}

#[cfg(feature = "parallel")]
fn decode_all(activities: &[Activity]) -> Vec<Result<Option<Vec<GpsPoint>>, HeatmapError>> {
    use rayon::prelude::*;

    log::debug!("[Aggregate] Decoding {} activities in parallel", activities.len());
    // Indexed collect keeps activity order
    activities.par_iter().map(Activity::decode_route).collect()
}
