//! Free-gesture stroke capture
//!
//! Records the raw pointer trajectory of one gesture interaction. Every
//! pointer-down starts a new stroke and discards the previous one.

use crate::types::{Point, StrokePoint, Surface};

#[derive(Debug, Clone, Copy, PartialEq)]
struct RawPoint {
    point: Point,
    elapsed_ms: i64,
}

/// Stroke buffer for the gesture stage
#[derive(Debug, Clone, Default)]
pub struct StrokeRecorder {
    surface: Option<Surface>,
    points: Vec<RawPoint>,
    started_at_ms: Option<i64>,
    drawing: bool,
}

impl StrokeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds that incoming points are clamped into
    pub fn set_surface(&mut self, surface: Surface) {
        self.surface = Some(surface);
    }

    /// Start a new stroke at `point`
    pub fn pointer_down(&mut self, point: Point, at_ms: i64) {
        self.points.clear();
        self.started_at_ms = Some(at_ms);
        self.drawing = true;
        self.push(point, 0);
    }

    /// Extend the stroke. Returns `false` when no stroke is being drawn.
    pub fn pointer_move(&mut self, point: Point, at_ms: i64) -> bool {
        if !self.drawing {
            return false;
        }
        let elapsed = self
            .started_at_ms
            .map(|start| at_ms.saturating_sub(start).max(0))
            .unwrap_or(0);
        self.push(point, elapsed);
        true
    }

    /// End the interaction; the stroke stays available until cleared or replaced
    pub fn pointer_up(&mut self) {
        self.drawing = false;
    }

    /// Discard the current stroke
    pub fn clear(&mut self) {
        self.points.clear();
        self.started_at_ms = None;
        self.drawing = false;
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The stroke in wire form, positions rounded to whole pixels
    pub fn stroke(&self) -> Vec<StrokePoint> {
        self.points
            .iter()
            .map(|p| StrokePoint {
                x: p.point.x.round() as i64,
                y: p.point.y.round() as i64,
                t: p.elapsed_ms,
            })
            .collect()
    }

    fn push(&mut self, point: Point, elapsed_ms: i64) {
        let point = match self.surface {
            Some(surface) => surface.clamp(point),
            None => point,
        };
        self.points.push(RawPoint { point, elapsed_ms });
    }
}
