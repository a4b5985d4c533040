//! Local stability: per-segment bridging and malformation analysis.
//!
//! Each extrusion path is re-sampled to a fixed spatial cadence and walked
//! segment by segment against the lines of the layer below. A segment whose
//! endpoint lies further than one flow width from anything below is
//! bridging; once the accumulated unsupported distance outgrows the
//! curvature-shortened bridge threshold, a support point is anchored and the
//! accumulator resets. Segments hanging over an edge additionally grow a
//! malformation score, seeded from the malformation of the lines below:
//! degraded geometry begets more degraded geometry on the next layer.

use crate::extrusion::{EntityTable, ExtrusionEntity, ExtrusionLine};
use crate::geometry::{signed_angle, Vec3f};
use crate::stability::distancer::LinesDistancer;
use crate::stability::{Issues, Params, SupportPoint};
use std::f32::consts::PI;

/// Malformation tuning constants, carried over from print tuning.
/// Base growth per overhanging segment...
const MALFORMATION_GAIN: f32 = 0.15;
/// ...split into a flat part and a curvature-driven part...
const MALFORMATION_FLAT_WEIGHT: f32 = 0.8;
const MALFORMATION_CURVATURE_WEIGHT: f32 = 0.2;
/// ...damped by the distance already spent hanging.
const MALFORMATION_DISTANCE_DAMPING: f32 = 0.5;
/// Fraction of the layer-below malformation a supported segment inherits.
const MALFORMATION_INHERITANCE: f32 = 0.9;

/// Accumulator of current extrusion path properties: unsupported distance
/// and the maximum accumulated curvature over that distance. Used to detect
/// too-long bridges and extrusions curving into air.
#[derive(Clone, Copy, Debug, Default)]
struct ExtrusionPropertiesAccumulator {
    distance: f32,
    /// Accumulated signed ccw angles.
    curvature: f32,
    /// Maximum absolute accumulated curvature.
    max_curvature: f32,
}

impl ExtrusionPropertiesAccumulator {
    fn add_distance(&mut self, dist: f32) {
        self.distance += dist;
    }

    fn add_angle(&mut self, ccw_angle: f32) {
        self.curvature += ccw_angle;
        self.max_curvature = self.max_curvature.max(self.curvature.abs());
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Walk one extrusion entity (recursing through collections) against the
/// previous layer's lines, anchoring bridges and scoring malformation.
///
/// The re-sampled segments, with their updated flags and malformation, are
/// appended to `checked_lines_out` for the island reckoner.
#[allow(clippy::too_many_arguments)]
pub(crate) fn check_entity_stability(
    entity: &ExtrusionEntity,
    table: &mut EntityTable,
    checked_lines_out: &mut Vec<ExtrusionLine>,
    layer_z: f32,
    flows: &crate::flow::RegionFlows,
    prev_layer_lines: &LinesDistancer,
    issues: &mut Issues,
    params: &Params,
) {
    let path = match entity {
        ExtrusionEntity::Collection(children) => {
            for child in children {
                check_entity_stability(
                    child,
                    table,
                    checked_lines_out,
                    layer_z,
                    flows,
                    prev_layer_lines,
                    issues,
                    params,
                );
            }
            return;
        }
        ExtrusionEntity::Path(path) => path,
    };
    if path.points.is_empty() {
        return;
    }

    let entity_id = table.register(path.role, path.mm3_per_mm);

    // Re-sample the path to segments no longer than the bridge distance, so
    // the analysis cadence does not depend on the source polyline density.
    // The leading zero-length segment anchors the path start: combined with
    // the oversized initial bridging distance below, it forces a support
    // under any path that begins in mid-air.
    let mut lines: Vec<ExtrusionLine> = Vec::with_capacity(path.points.len() * 3 / 2);
    lines.push(ExtrusionLine::new(path.points[0], path.points[0], entity_id));
    for pair in path.points.windows(2) {
        let (start, next) = (pair[0], pair[1]);
        let v = next - start;
        let dist_to_next = v.norm();
        let v = v.normalized();
        let lines_count = (dist_to_next / params.bridge_distance).ceil() as usize;
        if lines_count == 0 {
            continue;
        }
        let step_size = dist_to_next / lines_count as f32;
        for i in 0..lines_count {
            let a = start + v * (i as f32 * step_size);
            let b = start + v * ((i + 1) as f32 * step_size);
            lines.push(ExtrusionLine::new(a, b, entity_id));
        }
    }

    let mut bridging_acc = ExtrusionPropertiesAccumulator::default();
    let mut malformation_acc = ExtrusionPropertiesAccumulator::default();
    bridging_acc.add_distance(params.bridge_distance + 1.0);
    let flow_width = super::flow_width_for_role(flows, path.role);

    for line_idx in 0..lines.len() {
        let curr_angle = if line_idx + 1 < lines.len() {
            signed_angle(
                lines[line_idx].b - lines[line_idx].a,
                lines[line_idx + 1].b - lines[line_idx + 1].a,
            )
        } else {
            0.0
        };
        bridging_acc.add_angle(curr_angle);
        // Only left turns degrade the shape of an overhanging extrusion.
        malformation_acc.add_angle(curr_angle.max(0.0));

        let current_line = &mut lines[line_idx];
        let nearest = prev_layer_lines.signed_distance_from_lines(current_line.b);
        let dist_from_prev_layer = nearest.map_or(f32::INFINITY, |n| n.signed_distance);

        if dist_from_prev_layer.abs() < flow_width {
            // Supported from below.
            bridging_acc.reset();
        } else {
            bridging_acc.add_distance(current_line.len);
            // Accumulated curvature linearly shortens the tolerable bridge.
            if bridging_acc.distance
                > params.bridge_distance
                    / (1.0
                        + bridging_acc.max_curvature
                            * params.bridge_distance_decrease_by_curvature_factor
                            / PI)
            {
                issues.support_points.push(SupportPoint::new(
                    current_line.b.to_3d(layer_z),
                    0.0,
                    Vec3f::new(0.0, 0.0, -1.0),
                ));
                current_line.support_point_generated = true;
                bridging_acc.reset();
            }
        }

        if dist_from_prev_layer.abs() < flow_width * 2.0 {
            if let Some(nearest) = nearest {
                current_line.malformation +=
                    MALFORMATION_INHERITANCE * prev_layer_lines.line(nearest.line_idx).malformation;
            }
        }
        if dist_from_prev_layer > flow_width * 0.3 {
            // Hanging over the edge.
            malformation_acc.add_distance(current_line.len);
            current_line.malformation += MALFORMATION_GAIN
                * (MALFORMATION_FLAT_WEIGHT
                    + MALFORMATION_CURVATURE_WEIGHT * malformation_acc.max_curvature
                        / (1.0 + MALFORMATION_DISTANCE_DAMPING * malformation_acc.distance));
        } else {
            malformation_acc.reset();
        }
    }

    checked_lines_out.extend(lines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrusion::{EntityId, ExtrusionPath, ExtrusionRole};
    use crate::flow::{Flow, RegionFlows};
    use crate::geometry::Vec2f;
    use approx::assert_relative_eq;

    fn flows() -> RegionFlows {
        RegionFlows::uniform(Flow::new(0.4, 0.2))
    }

    fn straight_path(from: Vec2f, to: Vec2f) -> ExtrusionEntity {
        ExtrusionEntity::Path(ExtrusionPath::new(
            ExtrusionRole::Perimeter,
            vec![from, to],
            0.05,
        ))
    }

    fn run(
        entity: &ExtrusionEntity,
        prev_lines: Vec<ExtrusionLine>,
    ) -> (Vec<ExtrusionLine>, Issues) {
        let mut table = EntityTable::new();
        let mut out = Vec::new();
        let mut issues = Issues::default();
        let prev = LinesDistancer::new(prev_lines);
        check_entity_stability(
            entity,
            &mut table,
            &mut out,
            0.4,
            &flows(),
            &prev,
            &mut issues,
            &Params::default(),
        );
        (out, issues)
    }

    #[test]
    fn test_resampling_cadence() {
        // 5 mm at bridge_distance 2 → leading anchor segment + 3 equal thirds.
        let entity = straight_path(Vec2f::ZERO, Vec2f::new(5.0, 0.0));
        let below = vec![ExtrusionLine::new(
            Vec2f::ZERO,
            Vec2f::new(5.0, 0.0),
            EntityId(0),
        )];
        let (lines, _) = run(&entity, below);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].len, 0.0);
        for line in &lines[1..] {
            assert_relative_eq!(line.len, 5.0 / 3.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_fully_supported_path_is_quiet() {
        let entity = straight_path(Vec2f::ZERO, Vec2f::new(5.0, 0.0));
        let below = vec![ExtrusionLine::new(
            Vec2f::ZERO,
            Vec2f::new(5.0, 0.0),
            EntityId(0),
        )];
        let (lines, issues) = run(&entity, below);
        assert!(issues.support_points.is_empty());
        assert!(lines.iter().all(|l| !l.support_point_generated));
        assert!(lines.iter().all(|l| l.malformation == 0.0));
    }

    #[test]
    fn test_path_starting_in_air_gets_anchored_immediately() {
        // Nothing below at all: the oversized initial bridging distance plus
        // the zero-length anchor segment force a support at the path start.
        let entity = straight_path(Vec2f::ZERO, Vec2f::new(5.0, 0.0));
        let (lines, issues) = run(&entity, Vec::new());
        assert!(!issues.support_points.is_empty());
        let first = &issues.support_points[0];
        assert_relative_eq!(first.position.x, 0.0);
        assert_relative_eq!(first.position.z, 0.4);
        assert_eq!(first.direction, Vec3f::new(0.0, 0.0, -1.0));
        assert!(lines[0].support_point_generated);
    }

    #[test]
    fn test_bridge_support_after_leaving_anchor() {
        // Supported only for the first 0.5 mm; a support must appear once the
        // unsupported travel exceeds the bridge distance.
        let entity = straight_path(Vec2f::ZERO, Vec2f::new(5.0, 0.0));
        let below = vec![ExtrusionLine::new(
            Vec2f::ZERO,
            Vec2f::new(0.5, 0.0),
            EntityId(0),
        )];
        let (_, issues) = run(&entity, below);
        assert_eq!(issues.support_points.len(), 1);
        let sp = &issues.support_points[0];
        assert!(sp.position.x > 2.0 && sp.position.x < 5.0, "x = {}", sp.position.x);
        assert_relative_eq!(sp.position.y, 0.0);
        assert_relative_eq!(sp.position.z, 0.4);
        assert_eq!(sp.direction, Vec3f::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_overhang_grows_malformation() {
        // The path runs parallel to the line below, hanging over its outer
        // (right) side: close enough to not bridge, far enough to be past
        // the 0.3 flow-width overhang threshold.
        let entity = straight_path(Vec2f::new(0.0, -0.3), Vec2f::new(5.0, -0.3));
        let below = vec![ExtrusionLine::new(
            Vec2f::ZERO,
            Vec2f::new(5.0, 0.0),
            EntityId(0),
        )];
        let (lines, issues) = run(&entity, below);
        assert!(issues.support_points.is_empty());
        assert!(lines[1..].iter().all(|l| l.malformation > 0.0));
    }

    #[test]
    fn test_malformation_inherited_from_below() {
        let mut below = ExtrusionLine::new(Vec2f::ZERO, Vec2f::new(5.0, 0.0), EntityId(0));
        below.malformation = 1.0;
        let entity = straight_path(Vec2f::ZERO, Vec2f::new(5.0, 0.0));
        let (lines, _) = run(&entity, vec![below]);
        // Directly on top of a malformed line: inherits 0.9 of its score.
        assert!(lines[1..]
            .iter()
            .all(|l| (l.malformation - 0.9).abs() < 1e-6));
    }

    #[test]
    fn test_empty_path_is_skipped() {
        let entity = ExtrusionEntity::Path(ExtrusionPath::new(
            ExtrusionRole::Perimeter,
            Vec::new(),
            0.05,
        ));
        let (lines, issues) = run(&entity, Vec::new());
        assert!(lines.is_empty());
        assert!(issues.support_points.is_empty());
    }
}
