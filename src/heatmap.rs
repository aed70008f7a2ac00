//! Heatmap layer handed to the map renderer.
//!
//! The renderer receives a [`HeatLayer`]: the flat list of decoded points
//! with the blur radius, the tile layer to draw underneath, and the initial
//! view. The layer also carries a sparse density grid so non-interactive
//! consumers (JSON export, summaries) get per-cell counts without redoing
//! the binning.

use std::collections::HashMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{HeatmapError, Result};
use crate::{geo_utils, Bounds, GpsPoint};

/// Configuration for heatmap generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// Point radius in pixels for the density overlay (default: 25)
    pub radius: u32,
    /// Grid cell size in meters for the density summary (default: 100m)
    pub cell_size_meters: f64,
    /// Optional bounds; points outside are left out of the density grid
    pub bounds: Option<Bounds>,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            radius: 25,
            cell_size_meters: 100.0,
            bounds: None,
        }
    }
}

/// Base imagery drawn under the heat overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLayerConfig {
    /// URL template with `{s}`, `{z}`, `{x}`, `{y}` placeholders
    pub url_template: String,
    pub max_zoom: u8,
    pub attribution: String,
}

impl Default for TileLayerConfig {
    fn default() -> Self {
        Self {
            url_template: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            max_zoom: 18,
            attribution: "© OpenStreetMap contributors".to_string(),
        }
    }
}

/// Initial map view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: GpsPoint,
    pub zoom: u8,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: GpsPoint::new(51.505, -0.09),
            zoom: 13,
        }
    }
}

impl MapView {
    /// Same zoom, centered on the middle of `points`. Keeps the current
    /// view when there are no points.
    pub fn centered_on(self, points: &[GpsPoint]) -> Self {
        match Bounds::from_points(points) {
            Some(bounds) => Self { center: bounds.center(), ..self },
            None => self,
        }
    }
}

/// A single cell in the density grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    /// Grid row index
    pub row: i32,
    /// Grid column index
    pub col: i32,
    /// Cell center for rendering
    pub center_lat: f64,
    pub center_lng: f64,
    /// Normalized density (0.0-1.0) for color mapping
    pub density: f32,
    /// Number of points that fell in this cell
    pub visit_count: u32,
}

/// Sparse density grid over the decoded points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapResult {
    /// Non-empty cells only, ordered by row then column
    pub cells: Vec<HeatmapCell>,
    /// Bounds of the binned points; `None` when nothing was binned
    pub bounds: Option<Bounds>,
    /// Cell size used
    pub cell_size_meters: f64,
    /// Grid dimensions
    pub grid_rows: u32,
    pub grid_cols: u32,
    /// Highest visit count, used for normalization
    pub max_visits: u32,
    /// Points that were binned
    pub total_points: u32,
}

/// Grid coordinate
type CellCoord = (i32, i32);

/// Density grid builder
struct HeatmapGrid {
    cell_size_meters: f64,
    ref_lat: Option<f64>,
    cells: HashMap<CellCoord, u32>,
    bounds: Option<Bounds>,
    total_points: u32,
}

impl HeatmapGrid {
    fn new(cell_size_meters: f64) -> Self {
        Self {
            cell_size_meters,
            ref_lat: None,
            cells: HashMap::new(),
            bounds: None,
            total_points: 0,
        }
    }

    /// Meters per degree at the grid's reference latitude
    fn scale(&self) -> (f64, f64) {
        geo_utils::meters_per_degree(self.ref_lat.unwrap_or(0.0))
    }

    /// Convert lat/lng to grid coordinates
    fn to_grid_coords(&self, lat: f64, lng: f64) -> CellCoord {
        let ref_lat = self.ref_lat.unwrap_or(0.0);
        let (lat_m, lng_m) = self.scale();

        let row = ((lat - ref_lat) * lat_m / self.cell_size_meters).floor() as i32;
        let col = (lng * lng_m / self.cell_size_meters).floor() as i32;

        (row, col)
    }

    /// Get cell center coordinates
    fn cell_center(&self, row: i32, col: i32) -> (f64, f64) {
        let ref_lat = self.ref_lat.unwrap_or(0.0);
        let (lat_m, lng_m) = self.scale();

        let center_lat = ref_lat + (row as f64 + 0.5) * self.cell_size_meters / lat_m;
        let center_lng = (col as f64 + 0.5) * self.cell_size_meters / lng_m;

        (center_lat, center_lng)
    }

    fn add_point(&mut self, point: &GpsPoint) {
        // First point fixes the projection for the whole grid
        if self.ref_lat.is_none() {
            self.ref_lat = Some(point.latitude);
        }

        self.bounds = Some(match self.bounds {
            None => Bounds {
                min_lat: point.latitude,
                max_lat: point.latitude,
                min_lng: point.longitude,
                max_lng: point.longitude,
            },
            Some(b) => Bounds {
                min_lat: b.min_lat.min(point.latitude),
                max_lat: b.max_lat.max(point.latitude),
                min_lng: b.min_lng.min(point.longitude),
                max_lng: b.max_lng.max(point.longitude),
            },
        });

        let coord = self.to_grid_coords(point.latitude, point.longitude);
        *self.cells.entry(coord).or_insert(0) += 1;
        self.total_points += 1;
    }

    fn build(self) -> HeatmapResult {
        let max_visits = self.cells.values().copied().max().unwrap_or(0);

        let mut cells: Vec<HeatmapCell> = self
            .cells
            .iter()
            .map(|(&(row, col), &visit_count)| {
                let (center_lat, center_lng) = self.cell_center(row, col);
                HeatmapCell {
                    row,
                    col,
                    center_lat,
                    center_lng,
                    density: visit_count as f32 / max_visits as f32,
                    visit_count,
                }
            })
            .collect();
        cells.sort_by_key(|c| (c.row, c.col));

        let (grid_rows, grid_cols) = match (
            cells.iter().map(|c| c.row).min(),
            cells.iter().map(|c| c.row).max(),
            cells.iter().map(|c| c.col).min(),
            cells.iter().map(|c| c.col).max(),
        ) {
            (Some(min_row), Some(max_row), Some(min_col), Some(max_col)) => (
                (max_row - min_row + 1) as u32,
                (max_col - min_col + 1) as u32,
            ),
            _ => (0, 0),
        };

        HeatmapResult {
            cells,
            bounds: self.bounds,
            cell_size_meters: self.cell_size_meters,
            grid_rows,
            grid_cols,
            max_visits,
            total_points: self.total_points,
        }
    }
}

/// Bin points into a sparse density grid.
pub fn generate_heatmap(points: &[GpsPoint], config: &HeatmapConfig) -> HeatmapResult {
    let mut grid = HeatmapGrid::new(config.cell_size_meters);

    for point in points {
        if !point.is_valid() {
            continue;
        }
        // Skip points outside bounds if specified
        if let Some(bounds) = &config.bounds {
            if !bounds.contains(point) {
                continue;
            }
        }
        grid.add_point(point);
    }

    grid.build()
}

/// Everything the renderer needs to draw the heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatLayer {
    /// Flat list of decoded points
    pub points: Vec<GpsPoint>,
    /// Overlay radius in pixels
    pub radius: u32,
    pub tiles: TileLayerConfig,
    pub view: MapView,
    pub density: HeatmapResult,
}

impl HeatLayer {
    pub fn new(points: Vec<GpsPoint>, config: &HeatmapConfig, tiles: TileLayerConfig, view: MapView) -> Self {
        let density = generate_heatmap(&points, config);
        Self {
            points,
            radius: config.radius,
            tiles,
            view,
            density,
        }
    }
}

/// Draws a heat layer.
pub trait HeatmapRenderer {
    fn render(&mut self, layer: &HeatLayer) -> Result<()>;
}

/// Writes the layer as JSON.
pub struct JsonRenderer<W: Write> {
    writer: W,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> HeatmapRenderer for JsonRenderer<W> {
    fn render(&mut self, layer: &HeatLayer) -> Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, layer).map_err(HeatmapError::render)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(HeatmapError::render)
    }
}
