//! Global stability: walk the layered island graph bottom up, maintain the
//! live object parts and their weakest connections, and plant supports where
//! the torque balance goes unstable.

use crate::geometry::{Vec2f, Vec3f};
use crate::grid::SupportGridFilter;
use crate::stability::distancer::LinesDistancer;
use crate::stability::islands::{IslandConnection, LayerIslands};
use crate::stability::parts::{ActiveObjectParts, ObjectPart};
use crate::stability::{Issues, Params, SupportPoint};
use std::f32::consts::PI;
use tracing::debug;

/// How far past the extruded line's endpoint the pivot-site search probes;
/// far enough that the island's nearest-point projection lands on the rim
/// the part would tip over.
const PIVOT_SEARCH_DISTANCE: f32 = 300.0;

/// Run the torque-balance pass over the finished island graph.
///
/// Support points land in layer order, then in external-line order within
/// the layer, so the output is deterministic for a fixed input.
pub(crate) fn check_global_stability(
    mut supports_presence_grid: SupportGridFilter,
    islands_graph: &[LayerIslands],
    params: &Params,
) -> Issues {
    let mut issues = Issues::default();
    let mut active_object_parts = ActiveObjectParts::new();

    // Which part each island of the previous layer dissolved into, and the
    // weakest connection on that island's path back to the bed.
    let mut prev_island_part: Vec<usize> = Vec::new();
    let mut prev_island_weakest_connection: Vec<IslandConnection> = Vec::new();

    for (layer_idx, layer) in islands_graph.iter().enumerate() {
        let layer_z = layer.layer_z;
        let mut next_island_part: Vec<usize> = Vec::with_capacity(layer.islands.len());
        let mut next_island_weakest_connection: Vec<IslandConnection> =
            Vec::with_capacity(layer.islands.len());

        for island in &layer.islands {
            if island.connected_islands.is_empty() {
                // New object part emerging in mid-air (or on the bed).
                let part_id = active_object_parts.insert(island);
                next_island_part.push(part_id);
                next_island_weakest_connection.push(IslandConnection {
                    area: 1.0,
                    centroid_accumulator: Vec3f::ZERO,
                    second_moment_of_area_accumulator: Vec2f::splat(f32::INFINITY),
                });
                continue;
            }

            let mut transferred_weakest_connection = IslandConnection::default();
            let mut new_weakest_connection = IslandConnection::default();
            let mut part_ids: Vec<usize> = Vec::with_capacity(island.connected_islands.len());
            for (&prev_island_idx, connection) in &island.connected_islands {
                part_ids.push(active_object_parts.find(prev_island_part[prev_island_idx]));
                transferred_weakest_connection
                    .add(&prev_island_weakest_connection[prev_island_idx]);
                new_weakest_connection.add(connection);
            }
            // Merge every predecessor part into one; the smallest id wins so
            // the choice does not depend on discovery order.
            part_ids.sort_unstable();
            part_ids.dedup();
            let final_part_id = part_ids[0];
            for &part_id in &part_ids[1..] {
                debug!(
                    layer = layer_idx,
                    from = part_id,
                    into = final_part_id,
                    "merging object parts"
                );
                active_object_parts.merge(part_id, final_part_id);
            }

            // The island's weakest link is the weaker of what the
            // predecessors carried and the fresh joint to this layer.
            if transferred_weakest_connection.strength_estimate(layer_z)
                < new_weakest_connection.strength_estimate(layer_z)
            {
                new_weakest_connection = transferred_weakest_connection;
            }
            next_island_weakest_connection.push(new_weakest_connection);
            next_island_part.push(final_part_id);
            active_object_parts
                .access(final_part_id)
                .add(&ObjectPart::from_island(island));
        }

        prev_island_part = next_island_part;
        prev_island_weakest_connection = next_island_weakest_connection;

        // Part assignments for this layer are fixed; now sweep each island's
        // outermost lines and plant supports where the balance tips.
        for (island_idx, island) in layer.islands.iter().enumerate() {
            let part = active_object_parts.access(prev_island_part[island_idx]);
            let weakest_conn = &mut prev_island_weakest_connection[island_idx];

            let mut island_lines_dist: Option<LinesDistancer> = None;
            let mut unchecked_dist = params.min_distance_between_support_points + 1.0;

            for line in &island.external_lines {
                if (unchecked_dist + line.len < params.min_distance_between_support_points
                    && line.malformation < 0.3)
                    || line.len == 0.0
                {
                    unchecked_dist += line.len;
                    continue;
                }
                unchecked_dist = line.len;
                let force = part.is_stable_while_extruding(weakest_conn, line, layer_z, params);
                // Strictly positive only: a NaN ratio (infinite weakest
                // connection on an emerging part) must read as stable.
                if !(force > 0.0) {
                    continue;
                }
                // Pick a pivot-adjacent site: probe far beyond the line end
                // and project back onto the island outline.
                let distancer = island_lines_dist
                    .get_or_insert_with(|| LinesDistancer::new(island.external_lines.clone()));
                let search_point =
                    line.b + (line.b - line.a).normalized() * PIVOT_SEARCH_DISTANCE;
                let Some(hit) = distancer.signed_distance_from_lines(search_point) else {
                    continue;
                };
                let support_point = hit.nearest_point.to_3d(layer_z);
                if supports_presence_grid.position_taken(support_point) {
                    continue;
                }

                let area = params.support_points_interface_radius
                    * params.support_points_interface_radius
                    * PI;
                part.add_support_point(support_point, area);
                issues.support_points.push(SupportPoint::new(
                    support_point,
                    force,
                    (line.b - line.a).normalized().to_3d(0.0),
                ));
                supports_presence_grid.take_position(support_point);

                // The fresh anchor also reinforces the weakest link for the
                // rest of this island's sweep.
                weakest_conn.area += area;
                weakest_conn.centroid_accumulator += support_point * area;
                weakest_conn.second_moment_of_area_accumulator +=
                    support_point.xy().component_mul(support_point.xy()) * area;
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extrusion::{EntityId, ExtrusionLine};
    use crate::geometry::Vec2f;
    use crate::object::{Layer, PrintObject};
    use crate::stability::islands::Island;
    use std::collections::BTreeMap;

    fn empty_filter() -> SupportGridFilter {
        let object = PrintObject::new(
            Vec2f::new(40.0, 40.0),
            vec![Layer::new(10.0, Vec::new())],
        );
        SupportGridFilter::new(&object, 1.0)
    }

    fn bed_island(sticking_area: f32) -> Island {
        let line = ExtrusionLine::new(Vec2f::new(-5.0, 0.0), Vec2f::new(5.0, 0.0), EntityId(0));
        Island {
            volume: 0.5,
            volume_centroid_accumulator: Vec3f::new(0.0, 0.0, 0.2) * 0.5,
            sticking_area,
            sticking_centroid_accumulator: Vec3f::new(0.0, 0.0, 0.2) * sticking_area,
            sticking_second_moment_of_area_accumulator: Vec2f::new(8.3, 8.3) * sticking_area,
            external_lines: vec![line],
            ..Island::default()
        }
    }

    #[test]
    fn test_empty_graph_is_quiet() {
        let issues = check_global_stability(empty_filter(), &[], &Params::default());
        assert!(issues.support_points.is_empty());
    }

    #[test]
    fn test_single_bed_layer_emits_nothing() {
        // On the base layer every torque arm degenerates to zero and the
        // weakest connection is effectively infinite, so nothing is planted.
        let graph = vec![LayerIslands {
            islands: vec![bed_island(40.0)],
            layer_z: 0.2,
        }];
        let issues = check_global_stability(empty_filter(), &graph, &Params::default());
        assert!(issues.support_points.is_empty());
    }

    #[test]
    fn test_emerging_island_in_mid_air_is_supported() {
        // Layer 1 island with no connections below and no sticking: the part
        // is freshly hanging, so the very first checked line plants a support.
        let line = ExtrusionLine::new(Vec2f::new(-2.0, 3.0), Vec2f::new(2.0, 3.0), EntityId(0));
        let hanging = Island {
            volume: 0.1,
            volume_centroid_accumulator: Vec3f::new(0.0, 3.0, 0.4) * 0.1,
            external_lines: vec![line],
            ..Island::default()
        };
        let graph = vec![
            LayerIslands {
                islands: vec![],
                layer_z: 0.2,
            },
            LayerIslands {
                islands: vec![hanging],
                layer_z: 0.4,
            },
        ];
        let issues = check_global_stability(empty_filter(), &graph, &Params::default());
        assert_eq!(issues.support_points.len(), 1);
        let sp = &issues.support_points[0];
        assert_eq!(sp.force, 1.0);
        assert_eq!(sp.position.z, 0.4);
        // The planted site lies on the island's own outline.
        assert!(sp.position.y == 3.0);
    }

    #[test]
    fn test_voxel_filter_dedupes_repeat_sites() {
        // Two identical hanging islands in the same voxel cell across layers:
        // the second support lands in a taken cell and is dropped.
        let line = ExtrusionLine::new(Vec2f::new(-0.2, 0.0), Vec2f::new(0.2, 0.0), EntityId(0));
        let make_island = |z: f32| Island {
            volume: 0.01,
            volume_centroid_accumulator: Vec3f::new(0.0, 0.0, z) * 0.01,
            external_lines: vec![line],
            ..Island::default()
        };
        let graph = vec![
            LayerIslands {
                islands: vec![make_island(0.2)],
                layer_z: 0.2,
            },
            LayerIslands {
                islands: vec![make_island(0.3)],
                layer_z: 0.3,
            },
        ];
        let issues = check_global_stability(empty_filter(), &graph, &Params::default());
        assert_eq!(issues.support_points.len(), 1);
    }

    #[test]
    fn test_two_islands_merge_into_one_part() {
        // Two bed islands, then one island above connected to both.
        let left = bed_island(20.0);
        let right = {
            let mut island = bed_island(20.0);
            let shift = Vec2f::new(12.0, 0.0);
            island.external_lines = vec![ExtrusionLine::new(
                Vec2f::new(7.0, 0.0),
                Vec2f::new(17.0, 0.0),
                EntityId(1),
            )];
            island.volume_centroid_accumulator += shift.to_3d(0.0) * island.volume;
            island.sticking_centroid_accumulator += shift.to_3d(0.0) * island.sticking_area;
            island
        };

        let mut connected = BTreeMap::new();
        let conn = IslandConnection {
            area: 4.0,
            centroid_accumulator: Vec3f::new(6.0, 0.0, 0.4) * 4.0,
            second_moment_of_area_accumulator: Vec2f::new(40.0, 0.1) * 4.0,
        };
        connected.insert(0, conn);
        connected.insert(1, conn);
        let bridge = Island {
            connected_islands: connected,
            volume: 1.0,
            volume_centroid_accumulator: Vec3f::new(6.0, 0.0, 0.4),
            external_lines: vec![ExtrusionLine::new(
                Vec2f::new(-5.0, 0.0),
                Vec2f::new(17.0, 0.0),
                EntityId(0),
            )],
            ..Island::default()
        };

        let graph = vec![
            LayerIslands {
                islands: vec![left, right],
                layer_z: 0.2,
            },
            LayerIslands {
                islands: vec![bridge],
                layer_z: 0.4,
            },
        ];
        // The merge itself must not panic and the result stays deterministic;
        // the merged part's payload is the sum of all three islands.
        let first = check_global_stability(empty_filter(), &graph, &Params::default());
        let second = check_global_stability(empty_filter(), &graph, &Params::default());
        assert_eq!(first, second);
    }
}
