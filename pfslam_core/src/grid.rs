// pfslam_core/src/grid.rs

//! The per-particle raster occupancy map.
//!
//! Cells are stored row-major (`index = y * width + x`), with cell `(0, 0)`
//! anchored at the world-frame `origin`. The raster never grows: rays that
//! leave it are clipped at the border.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellState, OccupancyModel, RayOutcome};
use crate::error::{Result, SlamError};
use crate::pose::Pose;
use crate::scan::RangeScan;

// =========================================================================
// == Geometry ==
// =========================================================================

/// Represents a 2D index in the grid map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub x: usize,
    pub y: usize,
}

impl CellIndex {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Size and placement of the raster. Identical for every particle of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridGeometry {
    /// Metres per cell.
    pub resolution: f64,
    /// Number of cells along world X.
    pub width: usize,
    /// Number of cells along world Y.
    pub height: usize,
    /// World coordinate `[x, y]` of the lower-left corner of cell (0, 0).
    pub origin: [f64; 2],
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            resolution: 0.05,
            width: 400,
            height: 400,
            origin: [-10.0, -10.0],
        }
    }
}

impl GridGeometry {
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(SlamError::config(format!(
                "grid.resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SlamError::config(format!(
                "grid dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !(self.origin[0].is_finite() && self.origin[1].is_finite()) {
            return Err(SlamError::config("grid.origin must be finite"));
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Signed cell coordinates of a world point; may lie outside the raster.
    #[inline]
    pub fn world_to_cell_signed(&self, point: &Point2<f64>) -> (i64, i64) {
        let cx = ((point.x - self.origin[0]) / self.resolution).floor() as i64;
        let cy = ((point.y - self.origin[1]) / self.resolution).floor() as i64;
        (cx, cy)
    }

    /// Converts a world position to grid coordinates, `None` outside the raster.
    pub fn world_to_cell(&self, point: &Point2<f64>) -> Option<CellIndex> {
        let (cx, cy) = self.world_to_cell_signed(point);
        self.checked_index(cx, cy)
    }

    /// World position of the centre of a cell.
    pub fn cell_to_world(&self, index: CellIndex) -> Point2<f64> {
        Point2::new(
            self.origin[0] + (index.x as f64 + 0.5) * self.resolution,
            self.origin[1] + (index.y as f64 + 0.5) * self.resolution,
        )
    }

    #[inline]
    pub fn checked_index(&self, cx: i64, cy: i64) -> Option<CellIndex> {
        if cx >= 0 && cy >= 0 && (cx as usize) < self.width && (cy as usize) < self.height {
            Some(CellIndex::new(cx as usize, cy as usize))
        } else {
            None
        }
    }

    /// Clips the world segment `from -> to` to the raster rectangle
    /// (Liang-Barsky) and returns the cells of the surviving piece.
    ///
    /// `None` when the segment misses the raster or is not finite. The walk
    /// between the returned cells is therefore bounded by the raster size,
    /// however far away `to` lies.
    pub fn clip_segment(&self, from: &Point2<f64>, to: &Point2<f64>) -> Option<ClippedSegment> {
        if !(from.x.is_finite() && from.y.is_finite() && to.x.is_finite() && to.y.is_finite()) {
            return None;
        }
        let min = [self.origin[0], self.origin[1]];
        let max = [
            self.origin[0] + self.width as f64 * self.resolution,
            self.origin[1] + self.height as f64 * self.resolution,
        ];
        let d = to - from;
        if !(d.x.is_finite() && d.y.is_finite()) {
            return None;
        }

        let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
        for (p, q) in [
            (-d.x, from.x - min[0]),
            (d.x, max[0] - from.x),
            (-d.y, from.y - min[1]),
            (d.y, max[1] - from.y),
        ] {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
            } else {
                let r = q / p;
                if p < 0.0 {
                    t0 = t0.max(r);
                } else {
                    t1 = t1.min(r);
                }
            }
        }
        if t0 > t1 {
            return None;
        }

        let enter = if t0 > 0.0 { *from + d * t0 } else { *from };
        let exit = if t1 < 1.0 { *from + d * t1 } else { *to };
        Some(ClippedSegment {
            start: self.clamped_cell(&enter),
            end: self.clamped_cell(&exit),
            reaches_end: self.world_to_cell(to).is_some(),
        })
    }

    /// Cell of a point on or inside the raster border.
    fn clamped_cell(&self, point: &Point2<f64>) -> (i64, i64) {
        let (cx, cy) = self.world_to_cell_signed(point);
        (
            cx.clamp(0, self.width as i64 - 1),
            cy.clamp(0, self.height as i64 - 1),
        )
    }

    #[inline]
    fn linear_index(&self, index: CellIndex) -> usize {
        index.y * self.width + index.x
    }
}

/// The in-raster piece of a world segment, as signed cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClippedSegment {
    pub start: (i64, i64),
    pub end: (i64, i64),
    /// `true` when the original end point lies inside the raster.
    pub reaches_end: bool,
}

// =========================================================================
// == Bresenham traversal ==
// =========================================================================

/// Integer line walk between two (signed) cells, both endpoints included.
struct Bresenham {
    x: i64,
    y: i64,
    x1: i64,
    y1: i64,
    dx: i64,
    dy: i64,
    sx: i64,
    sy: i64,
    err: i64,
    done: bool,
}

impl Bresenham {
    fn new(start: (i64, i64), end: (i64, i64)) -> Self {
        let dx = (end.0 - start.0).abs();
        let dy = (end.1 - start.1).abs();
        Self {
            x: start.0,
            y: start.1,
            x1: end.0,
            y1: end.1,
            dx,
            dy,
            sx: if start.0 < end.0 { 1 } else { -1 },
            sy: if start.1 < end.1 { 1 } else { -1 },
            err: dx - dy,
            done: false,
        }
    }
}

impl Iterator for Bresenham {
    /// `(x, y, is_last)`
    type Item = (i64, i64, bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = (self.x, self.y);
        if current == (self.x1, self.y1) {
            self.done = true;
            return Some((current.0, current.1, true));
        }

        let e2 = 2 * self.err;
        if e2 > -self.dy {
            self.err -= self.dy;
            self.x += self.sx;
        }
        if e2 < self.dx {
            self.err += self.dx;
            self.y += self.sy;
        }
        Some((current.0, current.1, false))
    }
}

// =========================================================================
// == Ray casting results ==
// =========================================================================

/// One cell visited by a ray cast, with its classification at cast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracedCell {
    pub index: CellIndex,
    pub state: CellState,
}

/// The ordered cells a ray traversed, starting at the sensor cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RayTrace {
    pub cells: Vec<TracedCell>,
    /// `true` when the trace stopped at an occupied cell (the last entry).
    pub blocked: bool,
}

impl RayTrace {
    /// The occupied cell that terminated the ray, if any.
    pub fn obstacle(&self) -> Option<&TracedCell> {
        if self.blocked {
            self.cells.last()
        } else {
            None
        }
    }
}

/// What happened while integrating a scan; useful for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub beams_integrated: usize,
    /// Beams whose endpoint fell outside the raster and lost their hit.
    pub beams_clipped: usize,
    pub beams_ignored: usize,
}

// =========================================================================
// == GridMap ==
// =========================================================================

/// A fixed-size occupancy raster owned by exactly one particle.
///
/// `Clone` is a deep copy: the clone shares no storage with its source, which
/// is what lets resampled particles evolve their maps independently.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMap {
    geometry: GridGeometry,
    model: OccupancyModel,
    cells: Vec<Cell>,
}

impl GridMap {
    /// Creates a map with every cell unknown.
    pub fn new(geometry: GridGeometry, model: OccupancyModel) -> Self {
        Self {
            geometry,
            model,
            cells: vec![Cell::default(); geometry.cell_count()],
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn model(&self) -> &OccupancyModel {
        &self.model
    }

    pub fn resolution(&self) -> f64 {
        self.geometry.resolution
    }

    pub fn width(&self) -> usize {
        self.geometry.width
    }

    pub fn height(&self) -> usize {
        self.geometry.height
    }

    /// Raw cells in row-major order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: CellIndex) -> Option<&Cell> {
        if index.x < self.geometry.width && index.y < self.geometry.height {
            Some(&self.cells[self.geometry.linear_index(index)])
        } else {
            None
        }
    }

    /// Occupancy probability of a cell; 0.5 (unknown) outside the raster.
    pub fn occupancy(&self, index: CellIndex) -> f64 {
        self.cell(index)
            .map(|cell| self.model.occupancy(cell))
            .unwrap_or(0.5)
    }

    /// Occupancy of the cell containing a world point, `None` outside the raster.
    pub fn occupancy_at(&self, point: &Point2<f64>) -> Option<f64> {
        self.geometry
            .world_to_cell(point)
            .map(|index| self.occupancy(index))
    }

    pub fn state(&self, index: CellIndex) -> CellState {
        self.cell(index)
            .map(|cell| self.model.classify(cell))
            .unwrap_or(CellState::Unknown)
    }

    pub fn is_occupied(&self, index: CellIndex) -> bool {
        self.state(index) == CellState::Occupied
    }

    /// Number of cells that received at least one observation.
    pub fn known_cells(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_known()).count()
    }

    /// Applies the cell model to one cell. Out-of-range indices are ignored.
    pub fn update_cell(&mut self, index: CellIndex, outcome: RayOutcome) {
        if index.x < self.geometry.width && index.y < self.geometry.height {
            let i = self.geometry.linear_index(index);
            self.cells[i] = self.model.update(self.cells[i], outcome);
        }
    }

    /// Traces a beam from `pose` at body-frame `bearing` for up to `max_range` metres.
    ///
    /// Stops at the first occupied cell (included in the trace), at `max_range`, or
    /// when the ray leaves the raster. A ray starting outside begins where it enters.
    pub fn ray_cast(&self, pose: &Pose, bearing: f64, max_range: f64) -> RayTrace {
        let mut trace = RayTrace::default();
        if !(max_range.is_finite() && max_range >= 0.0 && bearing.is_finite() && pose.is_finite())
        {
            return trace;
        }

        let Some(segment) = self
            .geometry
            .clip_segment(&pose.position(), &pose.project(bearing, max_range))
        else {
            return trace;
        };

        for (cx, cy, _) in Bresenham::new(segment.start, segment.end) {
            match self.geometry.checked_index(cx, cy) {
                Some(index) => {
                    let state = self.state(index);
                    trace.cells.push(TracedCell { index, state });
                    if state == CellState::Occupied {
                        trace.blocked = true;
                        break;
                    }
                }
                None if trace.cells.is_empty() => continue,
                None => break,
            }
        }
        trace
    }

    /// Integrates every valid beam of `scan`, observed from `pose`, into the map.
    ///
    /// Cells along each beam receive a miss; the endpoint cell receives a hit when
    /// the beam echoed inside the sensor range. Endpoints outside the raster are
    /// clipped: the in-bounds part of the beam still certifies free space.
    pub fn integrate_scan(&mut self, pose: &Pose, scan: &RangeScan) -> IntegrationStats {
        let mut stats = IntegrationStats::default();
        if !pose.is_finite() {
            stats.beams_ignored = scan.len();
            return stats;
        }
        let origin = pose.position();

        for beam in &scan.beams {
            if !beam.is_valid() {
                stats.beams_ignored += 1;
                continue;
            }
            let length = scan.free_length(beam);
            if !length.is_finite() {
                stats.beams_ignored += 1;
                continue;
            }
            let echo = scan.is_echo(beam);
            stats.beams_integrated += 1;

            let segment = self
                .geometry
                .clip_segment(&origin, &pose.project(beam.bearing, length));
            let Some(segment) = segment else {
                if echo {
                    stats.beams_clipped += 1;
                }
                continue;
            };
            let hit = echo && segment.reaches_end;
            if echo && !hit {
                stats.beams_clipped += 1;
            }

            for (cx, cy, is_last) in Bresenham::new(segment.start, segment.end) {
                if let Some(index) = self.geometry.checked_index(cx, cy) {
                    let outcome = if is_last && hit {
                        RayOutcome::Hit
                    } else {
                        RayOutcome::Miss
                    };
                    self.update_cell(index, outcome);
                }
            }
        }
        stats
    }
}
