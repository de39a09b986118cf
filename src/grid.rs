//! Grid pattern classifier
//!
//! Turns a pointer trajectory over a 3×3 grid into an ordered path of cell
//! indices. Cells are numbered 1–9 row by row:
//!
//! ```text
//! 1 2 3
//! 4 5 6
//! 7 8 9
//! ```
//!
//! A drag that jumps between two cells on the same line of three (row, column or
//! diagonal) also passes through the cell between them; that cell is inserted
//! into the path even if no pointer sample landed on it.

use serde::{Deserialize, Serialize};

use crate::config::PatternStageConfig;
use crate::error::CaptureError;
use crate::types::{Point, Surface};

/// Number of cells in the grid
pub const GRID_CELLS: u8 = 9;

/// Cells on each line of three: (end, end, middle)
const LINES_OF_THREE: [(u8, u8, u8); 8] = [
    (1, 3, 2),
    (4, 6, 5),
    (7, 9, 8),
    (1, 7, 4),
    (2, 8, 5),
    (3, 9, 6),
    (1, 9, 5),
    (3, 7, 5),
];

/// The cell between `a` and `b` when they are the two ends of a line of three
pub fn midpoint(a: u8, b: u8) -> Option<u8> {
    LINES_OF_THREE
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, mid)| *mid)
}

/// Ordered cell indices visited during one interaction; never holds duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridPath(Vec<u8>);

impl GridPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn last(&self) -> Option<u8> {
        self.0.last().copied()
    }

    pub fn contains(&self, cell: u8) -> bool {
        self.0.contains(&cell)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn clear(&mut self) {
        self.0.clear();
    }

    fn push_unique(&mut self, cell: u8) -> bool {
        if self.contains(cell) {
            return false;
        }
        self.0.push(cell);
        true
    }
}

impl From<GridPath> for Vec<u8> {
    fn from(path: GridPath) -> Self {
        path.0
    }
}

/// Cell centers and hit radius for one surface size
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    surface: Surface,
    centers: [Point; GRID_CELLS as usize],
    hit_radius: f64,
}

impl GridGeometry {
    /// Lay the grid over `surface`.
    ///
    /// The hit radius is `hit_radius_fraction` of the smaller cell dimension, but
    /// never below `min_hit_radius_px`.
    pub fn new(surface: Surface, config: &PatternStageConfig) -> Result<Self, CaptureError> {
        if !(surface.width.is_finite() && surface.height.is_finite())
            || surface.width <= 0.0
            || surface.height <= 0.0
        {
            return Err(CaptureError::InvalidInput(format!(
                "surface must have a positive size, got {}x{}",
                surface.width, surface.height
            )));
        }

        let cell_w = surface.width / 3.0;
        let cell_h = surface.height / 3.0;
        let mut centers = [Point::new(0.0, 0.0); GRID_CELLS as usize];
        for (i, center) in centers.iter_mut().enumerate() {
            let row = (i / 3) as f64;
            let col = (i % 3) as f64;
            *center = Point::new(col * cell_w + cell_w / 2.0, row * cell_h + cell_h / 2.0);
        }

        let hit_radius = (cell_w.min(cell_h) * config.hit_radius_fraction)
            .max(config.min_hit_radius_px);

        Ok(Self {
            surface,
            centers,
            hit_radius,
        })
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn hit_radius(&self) -> f64 {
        self.hit_radius
    }

    /// Center of a cell (1–9)
    pub fn center(&self, cell: u8) -> Option<Point> {
        if !(1..=GRID_CELLS).contains(&cell) {
            return None;
        }
        Some(self.centers[(cell - 1) as usize])
    }

    /// The cell whose center is nearest to `point`, if within the hit radius.
    ///
    /// Equidistant centers resolve to the higher index.
    pub fn nearest_cell(&self, point: Point) -> Option<u8> {
        let point = self.surface.clamp(point);
        let mut best: Option<u8> = None;
        let mut best_distance = self.hit_radius;

        for (i, center) in self.centers.iter().enumerate() {
            let distance = point.distance_to(center);
            if distance <= best_distance {
                best_distance = distance;
                best = Some(i as u8 + 1);
            }
        }
        best
    }
}

/// Pointer-interaction state machine producing a [`GridPath`]
#[derive(Debug, Clone, Default)]
pub struct GridClassifier {
    geometry: Option<GridGeometry>,
    path: GridPath,
    tracking: bool,
}

impl GridClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier over a known surface
    pub fn with_geometry(geometry: GridGeometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::default()
        }
    }

    /// Replace the surface geometry (e.g. after a resize)
    pub fn set_geometry(&mut self, geometry: GridGeometry) {
        self.geometry = Some(geometry);
    }

    pub fn geometry(&self) -> Option<&GridGeometry> {
        self.geometry.as_ref()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Path built so far
    pub fn path(&self) -> &GridPath {
        &self.path
    }

    /// Drop any path and return to idle
    pub fn reset(&mut self) {
        self.path.clear();
        self.tracking = false;
    }

    /// Begin an interaction; the path restarts at the touched cell, if any
    pub fn pointer_down(&mut self, point: Point) -> &GridPath {
        self.path.clear();
        self.tracking = true;
        if let Some(cell) = self.hit(point) {
            self.path.push_unique(cell);
        }
        &self.path
    }

    /// Extend the path. Returns `true` when the path changed.
    pub fn pointer_move(&mut self, point: Point) -> bool {
        if !self.tracking {
            return false;
        }
        let Some(hit) = self.hit(point) else {
            return false;
        };
        if self.path.contains(hit) {
            return false;
        }

        if let Some(mid) = self.path.last().and_then(|last| midpoint(last, hit)) {
            self.path.push_unique(mid);
        }
        self.path.push_unique(hit)
    }

    /// Finish the interaction and emit the finalized path.
    ///
    /// Returns `None` when no interaction was in progress.
    pub fn pointer_up(&mut self) -> Option<GridPath> {
        if !self.tracking {
            return None;
        }
        self.tracking = false;
        Some(self.path.clone())
    }

    fn hit(&self, point: Point) -> Option<u8> {
        self.geometry.as_ref().and_then(|g| g.nearest_cell(point))
    }
}
