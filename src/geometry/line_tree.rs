//! Balanced AABB tree over an indexed set of 2D line segments.
//!
//! The tree is built over the bounding boxes of the segments and supports the
//! one query the stability analysis needs: the nearest segment to a point,
//! with the closest point on it. Storage uses an implicit indexing scheme
//! where the children of node `i` sit at `2*i + 1` and `2*i + 2`, which
//! avoids child pointers and keeps traversal cache friendly.
//!
//! The tree does not own the segments; queries take the same slice the tree
//! was built over, so the caller keeps a single canonical copy.

use crate::geometry::{closest_point_on_segment, Vec2f};

/// Anything that can be indexed as an oriented 2D segment.
pub trait Segment2 {
    fn seg_a(&self) -> Vec2f;
    fn seg_b(&self) -> Vec2f;
}

impl Segment2 for (Vec2f, Vec2f) {
    fn seg_a(&self) -> Vec2f {
        self.0
    }
    fn seg_b(&self) -> Vec2f {
        self.1
    }
}

/// 2D axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
struct Aabb2 {
    min: Vec2f,
    max: Vec2f,
}

impl Aabb2 {
    fn empty() -> Self {
        Self {
            min: Vec2f::splat(f32::MAX),
            max: Vec2f::splat(f32::MIN),
        }
    }

    fn from_segment<S: Segment2>(s: &S) -> Self {
        let (a, b) = (s.seg_a(), s.seg_b());
        Self {
            min: Vec2f::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2f::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    fn extend(&mut self, other: &Aabb2) {
        self.min = Vec2f::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y));
        self.max = Vec2f::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y));
    }

    fn center(&self) -> Vec2f {
        (self.min + self.max) * 0.5
    }

    /// 0 for x, 1 for y.
    fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        if d.x >= d.y {
            0
        } else {
            1
        }
    }

    /// Squared distance from a point to the box exterior, 0 inside.
    fn squared_exterior_distance(&self, p: Vec2f) -> f32 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        dx * dx + dy * dy
    }
}

const NPOS: usize = usize::MAX;
const INNER: usize = usize::MAX - 1;

#[derive(Clone, Debug)]
struct Node {
    /// Segment index for leaves, `INNER` for internal nodes, `NPOS` unused.
    idx: usize,
    bbox: Aabb2,
}

/// Result of a nearest-segment query.
#[derive(Clone, Copy, Debug)]
pub struct NearestSegment {
    /// Index of the nearest segment in the slice the tree was built over.
    pub segment_idx: usize,
    /// Closest point on that segment.
    pub point: Vec2f,
    /// Squared Euclidean distance to it.
    pub squared_distance: f32,
}

/// Balanced AABB tree over indexed 2D segments.
#[derive(Clone, Debug, Default)]
pub struct LineTree {
    nodes: Vec<Node>,
}

struct BuildInput {
    idx: usize,
    bbox: Aabb2,
    centroid: Vec2f,
}

impl LineTree {
    /// Build a tree over the given segments. An empty slice yields an empty
    /// tree whose queries report no hit.
    pub fn build<S: Segment2>(segments: &[S]) -> Self {
        if segments.is_empty() {
            return Self { nodes: Vec::new() };
        }

        let mut input: Vec<BuildInput> = segments
            .iter()
            .enumerate()
            .map(|(idx, s)| {
                let bbox = Aabb2::from_segment(s);
                BuildInput {
                    idx,
                    bbox,
                    centroid: bbox.center(),
                }
            })
            .collect();

        let len = input.len();
        let mut tree = Self {
            nodes: vec![
                Node {
                    idx: NPOS,
                    bbox: Aabb2::empty(),
                };
                len.next_power_of_two() * 2 - 1
            ],
        };
        tree.build_recursive(&mut input, 0, 0, len - 1);
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn build_recursive(&mut self, input: &mut [BuildInput], node: usize, left: usize, right: usize) {
        debug_assert!(node < self.nodes.len());
        debug_assert!(left <= right);

        if left == right {
            self.nodes[node].idx = input[left].idx;
            self.nodes[node].bbox = input[left].bbox;
            return;
        }

        let mut bbox = input[left].bbox;
        for item in &input[left + 1..=right] {
            bbox.extend(&item.bbox);
        }
        let axis = bbox.longest_axis();

        // Median split along the longest axis keeps the tree balanced.
        let center = (left + right) / 2;
        input[left..=right].select_nth_unstable_by(center - left, |a, b| {
            let (ka, kb) = if axis == 0 {
                (a.centroid.x, b.centroid.x)
            } else {
                (a.centroid.y, b.centroid.y)
            };
            ka.total_cmp(&kb)
        });

        self.nodes[node].idx = INNER;
        self.nodes[node].bbox = bbox;
        self.build_recursive(input, 2 * node + 1, left, center);
        self.build_recursive(input, 2 * node + 2, center + 1, right);
    }

    /// Find the segment nearest to `point`, branch-and-bound over the tree.
    ///
    /// `segments` must be the slice the tree was built over.
    pub fn nearest<S: Segment2>(&self, segments: &[S], point: Vec2f) -> Option<NearestSegment> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best = NearestSegment {
            segment_idx: NPOS,
            point: Vec2f::ZERO,
            squared_distance: f32::INFINITY,
        };
        self.nearest_recursive(segments, point, 0, &mut best);
        if best.segment_idx == NPOS {
            None
        } else {
            Some(best)
        }
    }

    fn nearest_recursive<S: Segment2>(
        &self,
        segments: &[S],
        point: Vec2f,
        node_idx: usize,
        best: &mut NearestSegment,
    ) {
        let node = &self.nodes[node_idx];
        if node.idx == NPOS {
            return;
        }
        if node.idx != INNER {
            let seg = &segments[node.idx];
            let closest = closest_point_on_segment(point, seg.seg_a(), seg.seg_b());
            let dist_sq = (closest - point).norm_squared();
            if dist_sq < best.squared_distance {
                *best = NearestSegment {
                    segment_idx: node.idx,
                    point: closest,
                    squared_distance: dist_sq,
                };
            }
            return;
        }

        let left = 2 * node_idx + 1;
        let right = 2 * node_idx + 2;
        let dist_left = self.nodes[left].bbox.squared_exterior_distance(point);
        let dist_right = self.nodes[right].bbox.squared_exterior_distance(point);

        // Descend into the nearer child first so the far one prunes harder.
        let (first, first_dist, second, second_dist) = if dist_left <= dist_right {
            (left, dist_left, right, dist_right)
        } else {
            (right, dist_right, left, dist_left)
        };
        if first_dist < best.squared_distance {
            self.nearest_recursive(segments, point, first, best);
        }
        if second_dist < best.squared_distance {
            self.nearest_recursive(segments, point, second, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn segs(points: &[((f32, f32), (f32, f32))]) -> Vec<(Vec2f, Vec2f)> {
        points
            .iter()
            .map(|&((ax, ay), (bx, by))| (Vec2f::new(ax, ay), Vec2f::new(bx, by)))
            .collect()
    }

    #[test]
    fn test_empty_tree_reports_no_hit() {
        let lines: Vec<(Vec2f, Vec2f)> = Vec::new();
        let tree = LineTree::build(&lines);
        assert!(tree.is_empty());
        assert!(tree.nearest(&lines, Vec2f::ZERO).is_none());
    }

    #[test]
    fn test_single_segment() {
        let lines = segs(&[((0.0, 0.0), (10.0, 0.0))]);
        let tree = LineTree::build(&lines);
        let hit = tree.nearest(&lines, Vec2f::new(5.0, 3.0)).unwrap();
        assert_eq!(hit.segment_idx, 0);
        assert_relative_eq!(hit.squared_distance, 9.0);
        assert_relative_eq!(hit.point.x, 5.0);
        assert_relative_eq!(hit.point.y, 0.0);
    }

    #[test]
    fn test_nearest_among_many() {
        // A horizontal ladder of segments; the query sits closest to rung 3.
        let lines = segs(&[
            ((0.0, 0.0), (10.0, 0.0)),
            ((0.0, 2.0), (10.0, 2.0)),
            ((0.0, 4.0), (10.0, 4.0)),
            ((0.0, 6.0), (10.0, 6.0)),
            ((0.0, 8.0), (10.0, 8.0)),
        ]);
        let tree = LineTree::build(&lines);
        let hit = tree.nearest(&lines, Vec2f::new(5.0, 5.8)).unwrap();
        assert_eq!(hit.segment_idx, 3);
        assert_relative_eq!(hit.point.y, 6.0);
    }

    #[test]
    fn test_matches_brute_force() {
        let lines = segs(&[
            ((0.0, 0.0), (4.0, 1.0)),
            ((4.0, 1.0), (4.0, 6.0)),
            ((4.0, 6.0), (-2.0, 6.0)),
            ((-2.0, 6.0), (-2.0, -1.0)),
            ((-2.0, -1.0), (0.0, 0.0)),
            ((1.0, 2.0), (2.0, 3.0)),
        ]);
        let tree = LineTree::build(&lines);
        for &(qx, qy) in &[(0.5, 0.5), (3.0, 3.0), (-5.0, 2.0), (10.0, 10.0), (1.5, 2.5)] {
            let q = Vec2f::new(qx, qy);
            let hit = tree.nearest(&lines, q).unwrap();
            let brute = lines
                .iter()
                .map(|&(a, b)| (closest_point_on_segment(q, a, b) - q).norm_squared())
                .fold(f32::INFINITY, f32::min);
            assert_relative_eq!(hit.squared_distance, brute, epsilon = 1e-5);
        }
    }
}
