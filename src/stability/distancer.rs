//! Signed distance queries over a set of extrusion lines.

use crate::extrusion::ExtrusionLine;
use crate::geometry::{LineTree, Vec2f};

/// Result of a signed nearest-line query.
#[derive(Clone, Copy, Debug)]
pub struct NearestLine {
    /// Euclidean distance to the nearest line, negated when the query point
    /// lies to the left of it (inside, for ccw oriented perimeters).
    pub signed_distance: f32,
    /// Index of the nearest line in [`LinesDistancer::lines`].
    pub line_idx: usize,
    /// Closest point on that line.
    pub nearest_point: Vec2f,
}

/// Bundles a set of extrusion lines with a search tree over them.
#[derive(Clone, Debug, Default)]
pub struct LinesDistancer {
    lines: Vec<ExtrusionLine>,
    tree: LineTree,
}

impl LinesDistancer {
    pub fn new(lines: Vec<ExtrusionLine>) -> Self {
        let tree = LineTree::build(&lines);
        Self { lines, tree }
    }

    #[inline]
    pub fn lines(&self) -> &[ExtrusionLine] {
        &self.lines
    }

    #[inline]
    pub fn line(&self, idx: usize) -> &ExtrusionLine {
        &self.lines[idx]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Nearest line to `point` with inside/outside sign, or `None` when the
    /// set is empty (callers treat that as distance +∞).
    pub fn signed_distance_from_lines(&self, point: Vec2f) -> Option<NearestLine> {
        let hit = self.tree.nearest(&self.lines, point)?;
        let line = &self.lines[hit.segment_idx];
        let mut distance = hit.squared_distance.sqrt();
        // Sign from the z component of (b - a) × (point - a).
        if (line.b - line.a).cross(point - line.a) > 0.0 {
            distance = -distance;
        }
        Some(NearestLine {
            signed_distance: distance,
            line_idx: hit.segment_idx,
            nearest_point: hit.point,
        })
    }

    /// Distance-only variant; +∞ for an empty set.
    pub fn signed_distance(&self, point: Vec2f) -> f32 {
        self.signed_distance_from_lines(point)
            .map_or(f32::INFINITY, |n| n.signed_distance)
    }
}
